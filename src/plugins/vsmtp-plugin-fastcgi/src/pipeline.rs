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

use crate::{Envelope, Error, FastCgiParameters, FastCgiProcessor, Verdict};

/// Event a stage of the chain is called for.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::AsRefStr, strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
pub enum Task {
    /// A client connected.
    Connect,
    /// HELO / EHLO received.
    Helo,
    /// MAIL FROM received.
    MailFrom,
    /// A recipient was appended by RCPT TO.
    ValidateRcpt,
    /// The message was received and must be stored.
    SaveMail,
}

/// A reply sent back to the smtp client.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct Reply {
    code: u16,
    text: String,
}

impl Reply {
    /// Build a reply, `text` may start with an enhanced status code.
    #[must_use]
    pub fn new(code: u16, text: impl Into<String>) -> Self {
        Self {
            code,
            text: text.into(),
        }
    }

    /// The 3 digits code.
    #[must_use]
    pub const fn code(&self) -> u16 {
        self.code
    }

    /// Text following the code.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Is the code a transient or permanent failure ?
    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.code >= 400
    }
}

impl std::fmt::Display for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.code, self.text)
    }
}

/// Predefined replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::AsRefStr)]
pub enum Canned {
    /// `250 2.0.0 OK`
    SuccessCmd,
    /// `250 2.1.5 OK`
    SuccessRcptCmd,
    /// `250 2.0.0 OK: queued`
    SuccessMessageQueued,
    /// `503 5.5.1 Error: No sender`
    FailNoSenderDataCmd,
}

impl From<Canned> for Reply {
    fn from(value: Canned) -> Self {
        match value {
            Canned::SuccessCmd => Self::new(250, "2.0.0 OK"),
            Canned::SuccessRcptCmd => Self::new(250, "2.1.5 OK"),
            Canned::SuccessMessageQueued => Self::new(250, "2.0.0 OK: queued"),
            Canned::FailNoSenderDataCmd => Self::new(503, "5.5.1 Error: No sender"),
        }
    }
}

/// The chain was stopped: `reply` goes to the client, `error` tells why.
#[derive(Debug, thiserror::Error)]
#[error("{reply}")]
pub struct Rejection {
    /// Reply for the client.
    pub reply: Reply,
    /// Cause of the rejection.
    #[source]
    pub error: Error,
}

impl Rejection {
    /// Pair a reply with its cause.
    #[must_use]
    pub fn new(reply: impl Into<Reply>, error: Error) -> Self {
        Self {
            reply: reply.into(),
            error,
        }
    }
}

/// Result of a stage, `Err` stops the chain.
pub type ProcessResult = Result<Reply, Rejection>;

/// A stage of the processing chain.
pub trait Processor: Send + Sync {
    /// Handle `task` for the transaction.
    ///
    /// # Errors
    ///
    /// * the transaction must be refused.
    fn process(&self, envelope: &Envelope, task: Task) -> ProcessResult;
}

impl<F> Processor for F
where
    F: Fn(&Envelope, Task) -> ProcessResult + Send + Sync,
{
    fn process(&self, envelope: &Envelope, task: Task) -> ProcessResult {
        self(envelope, task)
    }
}

/// Last stage of a chain, accepts everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct Accept;

impl Processor for Accept {
    fn process(&self, _: &Envelope, task: Task) -> ProcessResult {
        Ok(match task {
            Task::ValidateRcpt => Canned::SuccessRcptCmd,
            Task::SaveMail => Canned::SuccessMessageQueued,
            Task::Connect | Task::Helo | Task::MailFrom => Canned::SuccessCmd,
        }
        .into())
    }
}

/// Stage validating recipients and saving emails with the fastcgi scripts
/// before handing over to `next`.
#[derive(Debug)]
pub struct FastCgiStage<P> {
    processor: std::sync::Arc<FastCgiProcessor>,
    next: P,
}

impl<P: Processor> FastCgiStage<P> {
    /// Open the processor and insert the stage in front of `next`.
    ///
    /// # Errors
    ///
    /// * see [`FastCgiProcessor::connect`], no stage is created.
    pub fn initialize(parameters: FastCgiParameters, next: P) -> Result<Self, Error> {
        FastCgiProcessor::connect(parameters).map(|processor| Self::new(processor.into(), next))
    }

    /// Insert the stage in front of `next` with an opened processor.
    #[must_use]
    pub fn new(processor: std::sync::Arc<FastCgiProcessor>, next: P) -> Self {
        Self { processor, next }
    }

    /// Processor used by the stage.
    #[must_use]
    pub fn processor(&self) -> &FastCgiProcessor {
        &self.processor
    }

    fn validate_rcpt(&self, envelope: &Envelope, task: Task) -> ProcessResult {
        // called for each RCPT command, only the last recipient is new.
        let Some(rcpt) = envelope.last_rcpt() else {
            return self.next.process(envelope, task);
        };

        let cause = match self.processor.validate_rcpt(rcpt) {
            Ok(verdict) if verdict.is_pass() => return self.next.process(envelope, task),
            Ok(verdict) => {
                let response = verdict.into_body();
                tracing::debug!(%rcpt, ?response, "Recipient rejected.");
                Error::ValidationRejected {
                    rcpt: rcpt.to_string(),
                    response,
                }
            }
            Err(error) => {
                tracing::debug!(%rcpt, %error, "FastCgi error.");
                error
            }
        };

        Err(Rejection::new(
            Canned::FailNoSenderDataCmd,
            Error::StorageNotAvailable(Box::new(cause)),
        ))
    }

    fn save_mail(&self, envelope: &Envelope, task: Task) -> ProcessResult {
        // every recipient is in the form, the first verdict settles the transaction.
        let Some(rcpt) = envelope.rcpt_to.first() else {
            return self.next.process(envelope, task);
        };

        let error = match self.processor.save(envelope) {
            Ok(verdict) if verdict.is_saved() => return self.next.process(envelope, task),
            Ok(verdict) => Error::SaveRejected {
                rcpt: rcpt.to_string(),
                response: verdict.into_body(),
            },
            Err(error) => error,
        };

        tracing::error!(%rcpt, %error, "Could not save email.");
        Err(Rejection::new(
            Reply::new(554, format!("Error: could not save email for [{rcpt}]")),
            error,
        ))
    }
}

impl<P: Processor> Processor for FastCgiStage<P> {
    #[tracing::instrument(name = "fastcgi", skip_all, fields(task = task.as_ref()))]
    fn process(&self, envelope: &Envelope, task: Task) -> ProcessResult {
        match task {
            Task::ValidateRcpt => self.validate_rcpt(envelope, task),
            Task::SaveMail => self.save_mail(envelope, task),
            Task::Connect | Task::Helo | Task::MailFrom => self.next.process(envelope, task),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn canned_replies() {
        assert_eq!(
            Reply::from(Canned::FailNoSenderDataCmd).to_string(),
            "503 5.5.1 Error: No sender"
        );
        assert!(Reply::from(Canned::FailNoSenderDataCmd).is_error());
        assert!(!Reply::from(Canned::SuccessMessageQueued).is_error());
    }

    #[test]
    fn task_names() {
        assert_eq!(Task::ValidateRcpt.as_ref(), "validate_rcpt");
        assert_eq!("save_mail".parse::<Task>().unwrap(), Task::SaveMail);
    }

    #[test]
    fn closures_are_stages() {
        let stage = |_: &Envelope, _: Task| -> ProcessResult { Ok(Reply::new(250, "Ok")) };
        assert_eq!(
            stage.process(&Envelope::default(), Task::Helo).unwrap(),
            Reply::new(250, "Ok")
        );
        assert_eq!(
            Accept.process(&Envelope::default(), Task::SaveMail).unwrap(),
            Canned::SuccessMessageQueued.into()
        );
    }
}
