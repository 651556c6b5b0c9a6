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

use crate::protocol::{self, EndRequest, ProtocolStatus, RecordType};
use crate::transport::Stream;
use crate::{CgiResponse, ConnectionType, Error};
use std::io::Write;

/// CGI environment of a request.
pub type Env = std::collections::BTreeMap<String, String>;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// A single connection to a FastCGI responder. Requests are sent one
/// at a time with the `KEEP_CONN` flag so the socket is reused.
#[derive(Debug)]
pub struct FastCgiClient {
    stream: std::io::BufReader<Stream>,
    next_request_id: u16,
    broken: bool,
}

impl FastCgiClient {
    /// Dial the responder.
    ///
    /// # Errors
    ///
    /// * the socket could not be opened.
    pub fn dial(
        kind: ConnectionType,
        address: &str,
        timeout: std::time::Duration,
    ) -> std::io::Result<Self> {
        Stream::dial(kind, address, timeout).map(Self::new)
    }

    pub(crate) fn new(stream: Stream) -> Self {
        Self {
            stream: std::io::BufReader::new(stream),
            next_request_id: 1,
            broken: false,
        }
    }

    /// A previous request failed at the transport or protocol level,
    /// the connection must not be used anymore.
    #[must_use]
    pub const fn is_broken(&self) -> bool {
        self.broken
    }

    /// Check a connection before handing it out: not broken, and not
    /// closed by the responder while it was idle.
    ///
    /// # Errors
    ///
    /// * the connection cannot be used for a new request.
    pub fn check_idle(&mut self) -> std::io::Result<()> {
        if self.broken {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "fastcgi connection is broken",
            ));
        }
        if !self.stream.buffer().is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "unexpected data on an idle connection",
            ));
        }
        self.stream.get_mut().ensure_idle()
    }

    /// Send a GET request, the query is expected in `QUERY_STRING`.
    ///
    /// # Errors
    ///
    /// see [`FastCgiClient::request`]
    pub fn get(&mut self, mut env: Env) -> Result<CgiResponse, Error> {
        env.insert("REQUEST_METHOD".to_owned(), "GET".to_owned());
        env.insert("CONTENT_LENGTH".to_owned(), "0".to_owned());
        self.request(&env, &[])
    }

    /// Send a POST request with `form` url encoded in the body.
    ///
    /// # Errors
    ///
    /// see [`FastCgiClient::request`]
    pub fn post_form<'a>(
        &mut self,
        mut env: Env,
        form: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<CgiResponse, Error> {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(form)
            .finish();

        env.insert("REQUEST_METHOD".to_owned(), "POST".to_owned());
        env.insert("CONTENT_TYPE".to_owned(), FORM_CONTENT_TYPE.to_owned());
        env.insert("CONTENT_LENGTH".to_owned(), body.len().to_string());
        self.request(&env, body.as_bytes())
    }

    /// Send one request and wait for the whole response.
    ///
    /// # Errors
    ///
    /// * the connection is broken by a previous failure.
    /// * a parameter cannot be encoded, nothing is sent in that case.
    /// * writing the request or reading the response failed.
    /// * the responder answered with invalid records or an invalid cgi output.
    /// * the responder refused the request (`END_REQUEST` status).
    pub fn request(&mut self, env: &Env, stdin: &[u8]) -> Result<CgiResponse, Error> {
        if self.broken {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "connection closed after a previous failure",
            )
            .into());
        }

        let params =
            protocol::encode_params(env.iter().map(|(name, value)| (name.as_str(), value.as_str())))?;

        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.checked_add(1).unwrap_or(1);

        let stdout = self
            .send(request_id, &params, stdin)
            .and_then(|()| self.receive(request_id));

        if let Err(ref error) = stdout {
            if error.breaks_connection() {
                self.broken = true;
            }
        }

        // the record stream is complete at this point, a bad cgi output
        // leaves the connection usable.
        CgiResponse::parse(&stdout?)
    }

    fn send(&mut self, request_id: u16, params: &[u8], stdin: &[u8]) -> Result<(), Error> {
        let mut buffer = Vec::with_capacity(params.len() + stdin.len() + 64);
        protocol::write_begin_request(&mut buffer, request_id, true)?;
        protocol::write_stream(&mut buffer, RecordType::Params, request_id, params)?;
        protocol::write_stream(&mut buffer, RecordType::Stdin, request_id, stdin)?;

        let stream = self.stream.get_mut();
        stream.write_all(&buffer)?;
        stream.flush()?;
        Ok(())
    }

    fn receive(&mut self, request_id: u16) -> Result<Vec<u8>, Error> {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        let end = loop {
            let record = protocol::read_record(&mut self.stream)?;
            if record.request_id != request_id {
                return Err(Error::protocol(format!(
                    "{} record for request {} while waiting for {request_id}",
                    record.kind.as_ref(),
                    record.request_id
                )));
            }
            match record.kind {
                RecordType::Stdout => stdout.extend_from_slice(&record.content),
                RecordType::Stderr => stderr.extend_from_slice(&record.content),
                RecordType::EndRequest => break EndRequest::decode(&record.content)?,
                otherwise => {
                    return Err(Error::protocol(format!(
                        "unexpected {} record from the responder",
                        otherwise.as_ref()
                    )))
                }
            }
        };

        if !stderr.is_empty() {
            tracing::warn!(
                request_id,
                stderr = %String::from_utf8_lossy(&stderr),
                "Responder wrote to stderr."
            );
        }

        if end.protocol_status != ProtocolStatus::RequestComplete {
            return Err(Error::protocol(format!(
                "request {request_id} ended with {}",
                end.protocol_status
            )));
        }

        tracing::trace!(
            request_id,
            app_status = end.app_status,
            "<< {:?}",
            String::from_utf8_lossy(&stdout)
        );
        Ok(stdout)
    }
}
