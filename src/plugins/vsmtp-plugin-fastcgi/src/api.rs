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

use rhai::plugin::*;

/// This plugin exposes methods to delegate recipient validation and email
/// saving to scripts run by a FastCGI server, php-fpm for example.
#[rhai::plugin::export_module]
pub mod vsmtp_plugin_fastcgi {
    use crate::{Address, Envelope, FastCgiParameters, FastCgiProcessor};

    pub type FastCgi = rhai::Shared<FastCgiProcessor>;

    /// Open a pool of connections to a FastCGI server.
    ///
    /// # Args
    ///
    /// * `parameters` - a map of the following parameters:
    ///     * `fcgi_script_filename_save` - full path to the script saving emails.
    ///     * `fcgi_script_filename_validate` - full path to the script validating recipients.
    ///     * `fcgi_connection_type` - "tcp" or "unix".
    ///     * `fcgi_connection_address` - `host:port` or path of the socket.
    ///     * `timeout` - time allowed to open a connection or to wait for a free one. (default: 30s)
    ///     * `connections` - Number of connections to open to the server. (default: 4)
    ///
    /// # Return
    ///
    /// A service used to send requests to the scripts.
    ///
    /// # Error
    ///
    /// * The parameters are invalid.
    /// * The service failed to connect to the server.
    ///
    /// # Example
    ///
    /// ```text
    /// // Import the plugin stored in the `plugins` directory.
    /// import "plugins/libvsmtp_plugin_fastcgi" as fastcgi;
    ///
    /// export const php = fastcgi::connect(#{
    ///     fcgi_script_filename_save: "/srv/scripts/save.php",
    ///     fcgi_script_filename_validate: "/srv/scripts/validate.php",
    ///     fcgi_connection_type: "unix",
    ///     fcgi_connection_address: "/var/run/php/php-fpm.sock",
    ///     timeout: "5s",
    /// });
    /// ```
    #[rhai_fn(global, return_raw)]
    pub fn connect(parameters: rhai::Map) -> Result<FastCgi, Box<rhai::EvalAltResult>> {
        let parameters = rhai::serde::from_dynamic::<FastCgiParameters>(&parameters.into())?;

        FastCgiProcessor::connect(parameters)
            .map(rhai::Shared::new)
            .map_err::<Box<rhai::EvalAltResult>, _>(|err| err.to_string().into())
    }

    /// Send a GET request to a script.
    ///
    /// # Args
    ///
    /// * `script` - full path to the script to run.
    /// * `query` - a map sent in the query string.
    ///
    /// # Return
    ///
    /// The body printed by the script.
    ///
    /// # Example
    ///
    /// ```text
    /// import "services/fastcgi" as srv;
    ///
    /// #{
    ///     mail: [
    ///         action "ask the sender score" || {
    ///             const score = srv::php.get("/srv/scripts/score.php", #{ mail_from: ctx::mail_from() });
    ///             log("info", `score is: ${score}`);
    ///         }
    ///     ],
    /// }
    /// ```
    #[rhai_fn(global, return_raw, pure)]
    pub fn get(
        con: &mut FastCgi,
        script: &str,
        query: rhai::Map,
    ) -> Result<String, Box<rhai::EvalAltResult>> {
        let query = query
            .into_iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect::<Vec<_>>();

        con.get(
            script,
            query.iter().map(|(key, value)| (key.as_str(), value.as_str())),
        )
        .map(|body| String::from_utf8_lossy(&body).into_owned())
        .map_err::<Box<rhai::EvalAltResult>, _>(|err| err.to_string().into())
    }

    /// Ask the validation script if a recipient is accepted.
    ///
    /// # Args
    ///
    /// * `rcpt` - the address to check.
    ///
    /// # Return
    ///
    /// `true` if the script answered with a body starting with `PASS`.
    ///
    /// # Example
    ///
    /// ```text
    /// import "services/fastcgi" as srv;
    ///
    /// #{
    ///     rcpt: [
    ///         rule "validate recipient" || {
    ///             if srv::php.validate(ctx::rcpt()) { state::next() } else { state::deny() }
    ///         }
    ///     ],
    /// }
    /// ```
    #[rhai_fn(global, return_raw, pure)]
    pub fn validate(con: &mut FastCgi, rcpt: Dynamic) -> Result<bool, Box<rhai::EvalAltResult>> {
        let rcpt = rcpt
            .to_string()
            .parse::<Address>()
            .map_err::<Box<rhai::EvalAltResult>, _>(|err| err.to_string().into())?;

        con.validate_rcpt(&rcpt)
            .map(|verdict| verdict.is_pass())
            .map_err::<Box<rhai::EvalAltResult>, _>(|err| err.to_string().into())
    }

    /// Post an email to the save script.
    ///
    /// # Args
    ///
    /// * `envelope` - a map of the following fields:
    ///     * `mail_from` - the sender, omitted for the null sender.
    ///     * `rcpt_to` - an array of recipients.
    ///     * `remote_ip` - ip of the client.
    ///     * `helo` - argument of the helo command. (default: "")
    ///     * `tls` - was the transaction secured. (default: false)
    ///     * `subject` - read from the `data` headers when omitted.
    ///     * `data` - the raw message.
    ///
    /// # Return
    ///
    /// The body printed by the script.
    ///
    /// # Example
    ///
    /// ```text
    /// import "services/fastcgi" as srv;
    ///
    /// #{
    ///     preq: [
    ///         action "save in the application" || {
    ///             const status = srv::php.save(#{
    ///                 mail_from: ctx::mail_from(),
    ///                 rcpt_to: ctx::rcpt_list(),
    ///                 remote_ip: ctx::client_ip(),
    ///                 helo: ctx::helo(),
    ///                 tls: ctx::is_secured(),
    ///                 data: msg::mail(),
    ///             });
    ///             log("info", `save script answered: ${status}`);
    ///         }
    ///     ],
    /// }
    /// ```
    #[rhai_fn(global, return_raw, pure)]
    pub fn save(con: &mut FastCgi, envelope: rhai::Map) -> Result<String, Box<rhai::EvalAltResult>> {
        let mut envelope = rhai::serde::from_dynamic::<Envelope>(&envelope.into())?;
        if envelope.subject.is_empty() {
            envelope.parse_headers();
        }

        con.post_save(&envelope)
            .map(|body| String::from_utf8_lossy(&body).into_owned())
            .map_err::<Box<rhai::EvalAltResult>, _>(|err| err.to_string().into())
    }
}
