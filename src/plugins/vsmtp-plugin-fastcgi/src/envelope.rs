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

use crate::Address;

/// The transaction as seen by the plugin. It is never modified by the
/// requests sent to the responder.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct Envelope {
    /// Reverse path, `None` for the null sender `<>`.
    #[serde(default)]
    pub mail_from: Option<Address>,
    /// Recipients in the order they were received.
    #[serde(default)]
    pub rcpt_to: Vec<Address>,
    /// Ip address of the client.
    pub remote_ip: String,
    /// Argument of the HELO / EHLO command.
    #[serde(default)]
    pub helo: String,
    /// Was the transaction received over TLS ?
    #[serde(default)]
    pub tls: bool,
    /// Subject of the message, see [`Envelope::parse_headers`].
    #[serde(default)]
    pub subject: String,
    /// Raw message, headers included.
    #[serde(default)]
    pub data: String,
}

impl Envelope {
    /// Create an empty transaction for a client.
    #[must_use]
    pub fn new(remote_ip: impl Into<String>, helo: impl Into<String>, tls: bool) -> Self {
        Self {
            remote_ip: remote_ip.into(),
            helo: helo.into(),
            tls,
            ..Self::default()
        }
    }

    /// Add a recipient at the end of the list.
    pub fn push_rcpt(&mut self, rcpt: Address) {
        self.rcpt_to.push(rcpt);
    }

    /// The recipient appended by the last `RCPT TO` command.
    #[must_use]
    pub fn last_rcpt(&self) -> Option<&Address> {
        self.rcpt_to.last()
    }

    /// Set the raw message and read the headers the plugin needs from it.
    pub fn set_message(&mut self, data: impl Into<String>) {
        self.data = data.into();
        self.parse_headers();
    }

    /// Fill the subject with the `Subject` header of the message, if any.
    /// Folded header lines are joined with a single space.
    pub fn parse_headers(&mut self) {
        let mut subject: Option<String> = None;

        for line in self.data.lines() {
            if line.is_empty() {
                break;
            }
            if line.starts_with([' ', '\t']) {
                if let Some(subject) = subject.as_mut() {
                    subject.push(' ');
                    subject.push_str(line.trim());
                }
                continue;
            }
            if subject.is_some() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                if name.trim().eq_ignore_ascii_case("subject") {
                    subject = Some(value.trim().to_owned());
                }
            }
        }

        if let Some(subject) = subject {
            self.subject = subject;
        }
    }

    /// String form of the sender, empty for the null sender.
    #[must_use]
    pub fn mail_from_string(&self) -> String {
        self.mail_from
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default()
    }
}

impl std::fmt::Display for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr;
    use pretty_assertions::assert_eq;

    #[test]
    fn subject_from_headers() {
        let mut envelope = Envelope::new("127.0.0.1", "helo.example.com", true);
        envelope.set_message("From: a@example.com\r\nSubject:Test\r\n\r\nThis is a test.");
        assert_eq!(envelope.subject, "Test");
    }

    #[test]
    fn folded_subject() {
        let mut envelope = Envelope::default();
        envelope.set_message("subject: a long\r\n  subject line\r\nTo: b@example.com\r\n\r\nbody");
        assert_eq!(envelope.subject, "a long subject line");
    }

    #[test]
    fn subject_not_read_from_body() {
        let mut envelope = Envelope::default();
        envelope.subject = "kept".to_owned();
        envelope.set_message("From: a@example.com\r\n\r\nSubject: nope");
        assert_eq!(envelope.subject, "kept");
    }

    #[test]
    fn null_sender() {
        let mut envelope = Envelope::default();
        assert_eq!(envelope.mail_from_string(), "");
        envelope.mail_from = Some(addr!("test@example.com"));
        assert_eq!(envelope.mail_from_string(), "test@example.com");
    }

    #[test]
    fn last_rcpt() {
        let mut envelope = Envelope::default();
        assert_eq!(envelope.last_rcpt(), None);
        envelope.push_rcpt(addr!("first@example.com"));
        envelope.push_rcpt(addr!("second@example.com"));
        assert_eq!(envelope.last_rcpt(), Some(&addr!("second@example.com")));
    }
}
