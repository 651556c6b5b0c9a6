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

/// Output of a script: the CGI headers it printed and the body that follows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CgiResponse {
    /// Value of the `Status` header, 200 if absent.
    pub status: u16,
    /// Headers in the order they were sent.
    pub headers: Vec<(String, String)>,
    /// Everything after the blank line.
    pub body: Vec<u8>,
}

fn split_headers(stdout: &[u8]) -> Option<(&[u8], &[u8])> {
    let mut line_start = 0;
    while line_start <= stdout.len() {
        let rest = &stdout[line_start..];
        if rest.starts_with(b"\r\n") {
            return Some((&stdout[..line_start], &rest[2..]));
        }
        if rest.starts_with(b"\n") {
            return Some((&stdout[..line_start], &rest[1..]));
        }
        line_start += rest.iter().position(|byte| *byte == b'\n')? + 1;
    }
    None
}

impl CgiResponse {
    /// Parse the `STDOUT` stream of a responder.
    ///
    /// # Errors
    ///
    /// * the header block is not terminated by an empty line
    /// * a header line has no `:`
    /// * the `Status` header does not start with a 3 digit code
    pub fn parse(stdout: &[u8]) -> Result<Self, Error> {
        let (head, body) = split_headers(stdout)
            .ok_or_else(|| Error::protocol("cgi response has no end of headers"))?;

        let mut status = 200;
        let mut headers = Vec::new();

        for line in String::from_utf8_lossy(head).lines() {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| Error::protocol(format!("malformed cgi header {line:?}")))?;
            let (name, value) = (name.trim(), value.trim());

            if name.eq_ignore_ascii_case("status") {
                status = value
                    .get(..3)
                    .and_then(|code| code.parse::<u16>().ok())
                    .ok_or_else(|| Error::protocol(format!("malformed cgi status {value:?}")))?;
            }
            headers.push((name.to_owned(), value.to_owned()));
        }

        Ok(Self {
            status,
            headers,
            body: body.to_vec(),
        })
    }

    /// Get the first header named `name`, case insensitive.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Status tag a script writes at the very beginning of its body. Every
/// variant keeps the whole body as printed by the script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The body starts with `PASS`.
    Pass(String),
    /// The body starts with `SAVED`.
    Saved(String),
    /// Anything else, short and empty bodies included.
    Fail(String),
}

impl Verdict {
    /// Read the tag at the start of `body`. Bodies shorter than a tag
    /// never match it.
    #[must_use]
    pub fn parse(body: &[u8]) -> Self {
        let text = String::from_utf8_lossy(body).into_owned();
        if body.starts_with(b"PASS") {
            Self::Pass(text)
        } else if body.starts_with(b"SAVED") {
            Self::Saved(text)
        } else {
            Self::Fail(text)
        }
    }

    /// Accepted as a recipient validation.
    #[must_use]
    pub const fn is_pass(&self) -> bool {
        matches!(self, Self::Pass(_))
    }

    /// Accepted as an acknowledgement of a saved email.
    #[must_use]
    pub const fn is_saved(&self) -> bool {
        matches!(self, Self::Pass(_) | Self::Saved(_))
    }

    /// The body printed by the script.
    #[must_use]
    pub fn body(&self) -> &str {
        match self {
            Self::Pass(body) | Self::Saved(body) | Self::Fail(body) => body,
        }
    }

    /// Take the body printed by the script.
    #[must_use]
    pub fn into_body(self) -> String {
        match self {
            Self::Pass(body) | Self::Saved(body) | Self::Fail(body) => body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn php_fpm_output() {
        let response = CgiResponse::parse(
            b"X-Powered-By: PHP/8.2.7\r\nContent-type: text/html; charset=UTF-8\r\n\r\nPASSED",
        )
        .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(
            response.header("content-type"),
            Some("text/html; charset=UTF-8")
        );
        assert_eq!(response.body, b"PASSED");
    }

    #[test]
    fn status_header_and_bare_lf() {
        let response = CgiResponse::parse(b"Status: 404 Not Found\nContent-type: text/plain\n\nFAIL").unwrap();
        assert_eq!(response.status, 404);
        assert_eq!(response.body, b"FAIL");
    }

    #[test]
    fn no_headers() {
        let response = CgiResponse::parse(b"\r\nPASS").unwrap();
        assert!(response.headers.is_empty());
        assert_eq!(response.body, b"PASS");
    }

    #[test]
    fn body_keeps_blank_lines() {
        let response = CgiResponse::parse(b"Content-type: text/plain\r\n\r\nSAVED\r\n\r\nid=1").unwrap();
        assert_eq!(response.body, b"SAVED\r\n\r\nid=1");
    }

    #[rstest::rstest]
    #[case::unterminated(b"Content-type: text/plain\r\nPASS".as_slice())]
    #[case::empty(b"".as_slice())]
    #[case::not_a_header(b"PASS\r\n\r\n".as_slice())]
    #[case::bad_status(b"Status: ok\r\n\r\n".as_slice())]
    fn malformed(#[case] stdout: &[u8]) {
        assert!(matches!(CgiResponse::parse(stdout), Err(Error::Protocol(_))));
    }

    #[rstest::rstest]
    #[case(b"PASS".as_slice(), Verdict::Pass("PASS".to_owned()))]
    #[case(b"PASSED".as_slice(), Verdict::Pass("PASSED".to_owned()))]
    #[case(b"SAVED id=42".as_slice(), Verdict::Saved("SAVED id=42".to_owned()))]
    #[case(b"PAS".as_slice(), Verdict::Fail("PAS".to_owned()))]
    #[case(b"".as_slice(), Verdict::Fail(String::new()))]
    #[case(b"pass".as_slice(), Verdict::Fail("pass".to_owned()))]
    #[case(b"FAIL: unknown user".as_slice(), Verdict::Fail("FAIL: unknown user".to_owned()))]
    fn verdict(#[case] body: &[u8], #[case] expected: Verdict) {
        assert_eq!(Verdict::parse(body), expected);
    }

    #[test]
    fn saved_is_not_a_valid_recipient() {
        let verdict = Verdict::parse(b"SAVED");
        assert!(!verdict.is_pass());
        assert!(verdict.is_saved());
        assert_eq!(verdict.body(), "SAVED");
        assert!(Verdict::parse(b"PASS").is_saved());
    }
}
