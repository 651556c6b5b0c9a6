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

/// Errors produced while talking to the FastCGI responder.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The plugin parameters could not be used.
    #[error("invalid fastcgi configuration: {0}")]
    Config(String),

    /// The responder could not be reached when the service was opened.
    #[error("could not connect to the fastcgi responder at '{address}': {source}")]
    Connection {
        /// `host:port` or socket path that was dialed.
        address: String,
        /// Underlying dial failure.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Sending the request or reading the response failed.
    #[error("fastcgi transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// No connection could be checked out of the pool in time.
    #[error("fastcgi connection pool exhausted: {0}")]
    Pool(#[from] r2d2::Error),

    /// The responder sent data that is not valid FastCGI or CGI.
    #[error("fastcgi protocol error: {0}")]
    Protocol(String),

    /// The validation script refused the recipient.
    #[error("recipient '{rcpt}' rejected by the validation script: {response:?}")]
    ValidationRejected {
        /// The recipient that was checked.
        rcpt: String,
        /// Body returned by the script.
        response: String,
    },

    /// The save script did not acknowledge the message.
    #[error("email for '{rcpt}' not saved by the save script: {response:?}")]
    SaveRejected {
        /// The recipient named in the reply.
        rcpt: String,
        /// Body returned by the script.
        response: String,
    },

    /// Marker paired with the canned reply of a failed recipient validation.
    #[error("storage not available")]
    StorageNotAvailable(#[source] Box<Error>),
}

impl Error {
    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Does this error leave the connection unusable ?
    #[must_use]
    pub(crate) const fn breaks_connection(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Protocol(_))
    }
}
