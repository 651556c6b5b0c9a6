/*
 * vSMTP mail transfer agent
 * Copyright (C) 2022 viridIT SAS
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or any later version.
 *
 * This program is distributed in the hope that it will be useful, but WITHOUT
 * ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
 * FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * this program. If not, see https://www.gnu.org/licenses/.
 *
*/

use crate::client::Env;
use crate::manager::{FastCgiConnectionManager, TracingErrorHandler};
use crate::{Address, Envelope, Error, FastCgiParameters, Verdict};

/// Value of `SERVER_SOFTWARE` sent with every request.
pub const SERVER_SOFTWARE: &str = "vSMTP fastcgi";
/// Value of `REMOTE_ADDR` sent with every request.
pub const REMOTE_ADDR: &str = "127.0.0.1";

/// Sends recipient validations and emails to the configured scripts.
///
/// Each call checks a connection out of a pool, so a processor can be
/// shared between all the workers of the server.
pub struct FastCgiProcessor {
    parameters: FastCgiParameters,
    pool: r2d2::Pool<FastCgiConnectionManager>,
}

impl std::fmt::Debug for FastCgiProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastCgiProcessor")
            .field("parameters", &self.parameters)
            .field("state", &self.pool.state())
            .finish()
    }
}

impl FastCgiProcessor {
    /// Open the connections to the responder.
    ///
    /// # Errors
    ///
    /// * the parameters are invalid.
    /// * the responder could not be dialed.
    /// * the pool could not open its connections within `timeout`.
    #[tracing::instrument(name = "fastcgi", skip_all, fields(address = %parameters.connection_address))]
    pub fn connect(parameters: FastCgiParameters) -> Result<Self, Error> {
        parameters.check()?;

        let manager = FastCgiConnectionManager::new(
            parameters.connection_type,
            parameters.connection_address.clone(),
            parameters.timeout,
        );
        let connection_error = |source: Box<dyn std::error::Error + Send + Sync>| {
            tracing::debug!(%source, "FastCgi error.");
            Error::Connection {
                address: parameters.connection_address.clone(),
                source,
            }
        };

        // the pool only reports a timeout, dial once to get the real cause.
        r2d2::ManageConnection::connect(&manager).map_err(|error| connection_error(error.into()))?;

        let pool = r2d2::Pool::builder()
            .max_size(parameters.connections)
            .connection_timeout(parameters.timeout)
            .error_handler(Box::new(TracingErrorHandler))
            .build(manager)
            .map_err(|error| connection_error(error.into()))?;

        Ok(Self { parameters, pool })
    }

    /// Parameters used to open the processor.
    #[must_use]
    pub const fn parameters(&self) -> &FastCgiParameters {
        &self.parameters
    }

    fn env(script: &str) -> Env {
        Env::from([
            ("SCRIPT_FILENAME".to_owned(), script.to_owned()),
            ("SERVER_SOFTWARE".to_owned(), SERVER_SOFTWARE.to_owned()),
            ("REMOTE_ADDR".to_owned(), REMOTE_ADDR.to_owned()),
        ])
    }

    /// Send a GET request to `script` with `query` in the query string.
    ///
    /// # Errors
    ///
    /// * no connection was available.
    /// * the request failed, see [`crate::FastCgiClient::request`].
    pub fn get<'a>(
        &self,
        script: &str,
        query: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<Vec<u8>, Error> {
        let mut env = Self::env(script);
        env.insert(
            "QUERY_STRING".to_owned(),
            url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(query)
                .finish(),
        );

        let response = self
            .pool
            .get()
            .map_err(Error::from)
            .and_then(|mut client| client.get(env))
            .map_err(|error| {
                tracing::debug!(%error, script, "FastCgi Get failed.");
                error
            })?;

        Ok(response.body)
    }

    /// Fields of the form posted to the save script.
    #[must_use]
    pub fn save_form(envelope: &Envelope) -> Vec<(String, String)> {
        let mut form = envelope
            .rcpt_to
            .iter()
            .enumerate()
            .map(|(index, rcpt)| (format!("rcpt_to_{index}"), rcpt.to_string()))
            .collect::<Vec<_>>();

        form.extend([
            ("remote_ip".to_owned(), envelope.remote_ip.clone()),
            ("subject".to_owned(), envelope.subject.clone()),
            ("tls_on".to_owned(), envelope.tls.to_string()),
            ("helo".to_owned(), envelope.helo.clone()),
            ("mail_from".to_owned(), envelope.mail_from_string()),
            ("body".to_owned(), envelope.to_string()),
        ]);
        form
    }

    /// Post the email to the save script.
    ///
    /// # Errors
    ///
    /// * no connection was available.
    /// * the request failed, see [`crate::FastCgiClient::request`].
    pub fn post_save(&self, envelope: &Envelope) -> Result<Vec<u8>, Error> {
        let form = Self::save_form(envelope);
        let script = self.parameters.script_filename_save.as_str();

        let response = self
            .pool
            .get()
            .map_err(Error::from)
            .and_then(|mut client| {
                client.post_form(
                    Self::env(script),
                    form.iter().map(|(name, value)| (name.as_str(), value.as_str())),
                )
            })
            .map_err(|error| {
                tracing::debug!(%error, script, "FastCgi Post failed.");
                error
            })?;

        Ok(response.body)
    }

    /// Ask the validation script about `rcpt`.
    ///
    /// # Errors
    ///
    /// see [`FastCgiProcessor::get`]
    pub fn validate_rcpt(&self, rcpt: &Address) -> Result<Verdict, Error> {
        self.get(
            &self.parameters.script_filename_validate,
            [("rcpt_to", rcpt.full())],
        )
        .map(|body| Verdict::parse(&body))
    }

    /// Post the email to the save script and read its verdict.
    ///
    /// # Errors
    ///
    /// see [`FastCgiProcessor::post_save`]
    pub fn save(&self, envelope: &Envelope) -> Result<Verdict, Error> {
        self.post_save(envelope).map(|body| Verdict::parse(&body))
    }
}
