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

use crate::{ConnectionType, FastCgiClient};

/// Opens the connections of the pool, one per worker in use.
#[derive(Debug, Clone)]
pub struct FastCgiConnectionManager {
    kind: ConnectionType,
    address: String,
    timeout: std::time::Duration,
}

impl FastCgiConnectionManager {
    /// Create a manager dialing `address`.
    #[must_use]
    pub fn new(kind: ConnectionType, address: String, timeout: std::time::Duration) -> Self {
        Self {
            kind,
            address,
            timeout,
        }
    }

    /// `host:port` or socket path of the responder.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }
}

impl r2d2::ManageConnection for FastCgiConnectionManager {
    type Connection = FastCgiClient;
    type Error = std::io::Error;

    fn connect(&self) -> Result<Self::Connection, Self::Error> {
        tracing::debug!(kind = %self.kind, address = %self.address, "Opening fastcgi connection.");
        FastCgiClient::dial(self.kind, &self.address, self.timeout)
    }

    fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        conn.check_idle().map_err(|error| {
            tracing::debug!(%error, address = %self.address, "Dropping fastcgi connection.");
            error
        })
    }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        conn.is_broken()
    }
}

/// Report the failures of the connections opened in the background.
#[derive(Debug, Clone, Copy)]
pub struct TracingErrorHandler;

impl r2d2::HandleError<std::io::Error> for TracingErrorHandler {
    fn handle_error(&self, error: std::io::Error) {
        tracing::error!(%error, "Fastcgi connection failure.");
    }
}
