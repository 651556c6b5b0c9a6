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

use crate::Error;

/// Transport used to reach the responder.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    strum::Display,
    strum::AsRefStr,
    strum::EnumString,
    serde_with::SerializeDisplay,
    serde_with::DeserializeFromStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionType {
    /// `host:port`, eg. "127.0.0.1:9000"
    Tcp,
    /// path to a socket, eg. "/var/run/php/php-fpm.sock"
    Unix,
}

/// Parameters available for the fastcgi service. Used
/// with serde for easy parsing.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct FastCgiParameters {
    /// full path to the script for the save mail task,
    /// eg. "/home/user/scripts/save.php"
    #[serde(rename = "fcgi_script_filename_save")]
    pub script_filename_save: String,
    /// full path to the script for recipient validation,
    /// eg. "/home/user/scripts/validate.php"
    #[serde(rename = "fcgi_script_filename_validate")]
    pub script_filename_validate: String,
    /// "tcp" or "unix"
    #[serde(rename = "fcgi_connection_type")]
    pub connection_type: ConnectionType,
    /// where to dial.
    #[serde(rename = "fcgi_connection_address")]
    pub connection_address: String,
    /// time allowed to open a connection or to wait for a free one.
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: std::time::Duration,
    /// number of connections kept open to the responder.
    #[serde(default = "default_connections")]
    pub connections: u32,
}

const fn default_connections() -> u32 {
    4
}

const fn default_timeout() -> std::time::Duration {
    std::time::Duration::from_secs(30)
}

impl FastCgiParameters {
    /// Build parameters with the default pool settings.
    #[must_use]
    pub fn new(
        script_filename_save: impl Into<String>,
        script_filename_validate: impl Into<String>,
        connection_type: ConnectionType,
        connection_address: impl Into<String>,
    ) -> Self {
        Self {
            script_filename_save: script_filename_save.into(),
            script_filename_validate: script_filename_validate.into(),
            connection_type,
            connection_address: connection_address.into(),
            timeout: default_timeout(),
            connections: default_connections(),
        }
    }

    pub(crate) fn check(&self) -> Result<(), Error> {
        if self.connection_address.is_empty() {
            return Err(Error::Config(
                "`fcgi_connection_address` must not be empty".to_owned(),
            ));
        }
        if self.connections == 0 {
            return Err(Error::Config(
                "`connections` must be at least 1".to_owned(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(Error::Config("`timeout` must be positive".to_owned()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn deserialize_with_defaults() {
        let parameters = serde_json::from_str::<FastCgiParameters>(
            r#"{
                "fcgi_script_filename_save": "/srv/save.php",
                "fcgi_script_filename_validate": "/srv/validate.php",
                "fcgi_connection_type": "unix",
                "fcgi_connection_address": "/tmp/php-fpm.sock"
            }"#,
        )
        .unwrap();

        assert_eq!(parameters.connection_type, ConnectionType::Unix);
        assert_eq!(parameters.timeout, std::time::Duration::from_secs(30));
        assert_eq!(parameters.connections, 4);
        parameters.check().unwrap();
    }

    #[test]
    fn unknown_connection_type() {
        let error = serde_json::from_str::<FastCgiParameters>(
            r#"{
                "fcgi_script_filename_save": "/srv/save.php",
                "fcgi_script_filename_validate": "/srv/validate.php",
                "fcgi_connection_type": "udp",
                "fcgi_connection_address": "127.0.0.1:9000"
            }"#,
        );
        assert!(error.is_err());
    }

    #[test]
    fn empty_pool() {
        let mut parameters =
            FastCgiParameters::new("save", "validate", ConnectionType::Tcp, "127.0.0.1:9000");
        parameters.connections = 0;
        assert!(matches!(parameters.check(), Err(Error::Config(_))));
    }

    #[test]
    fn zero_timeout() {
        let parameters = serde_json::from_str::<FastCgiParameters>(
            r#"{
                "fcgi_script_filename_save": "/srv/save.php",
                "fcgi_script_filename_validate": "/srv/validate.php",
                "fcgi_connection_type": "unix",
                "fcgi_connection_address": "/tmp/php-fpm.sock",
                "timeout": "0s"
            }"#,
        )
        .unwrap();

        assert!(matches!(
            parameters.check(),
            Err(Error::Config(message)) if message.contains("timeout")
        ));
    }
}
