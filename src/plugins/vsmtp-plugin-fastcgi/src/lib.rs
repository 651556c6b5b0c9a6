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

//! # vSMTP fastcgi plugin
//!
//! Delegates recipient validation and email saving to scripts executed by a
//! FastCGI server (php-fpm, ...).
//!
//! * the validation script receives the last recipient in the `rcpt_to` query
//!   parameter and answers with a body starting with `PASS` to accept it.
//! * the save script receives the transaction as a posted form and answers with
//!   a body starting with `PASS` or `SAVED` once the email is stored.
//!
//! The plugin can be loaded by the rule engine (see [`module_entrypoint`]) or
//! used from rust as a stage of a processing chain (see [`FastCgiStage`]).

#![doc(html_no_source)]
#![deny(missing_docs)]
#![deny(unsafe_code)]
//
#![warn(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::cargo)]
// restriction we ignore
#![allow(
    clippy::blanket_clippy_restriction_lints,
    clippy::implicit_return,
    clippy::missing_docs_in_private_items,
    clippy::shadow_reuse,
    clippy::module_name_repetitions,
    clippy::multiple_crate_versions
)]

mod address;
mod api;
mod client;
mod config;
mod envelope;
mod error;
mod manager;
mod pipeline;
mod processor;
mod protocol;
mod response;
mod transport;


pub use address::Address;
pub use client::{Env, FastCgiClient};
pub use config::{ConnectionType, FastCgiParameters};
pub use envelope::Envelope;
pub use error::Error;
pub use manager::FastCgiConnectionManager;
pub use pipeline::{
    Accept, Canned, FastCgiStage, ProcessResult, Processor, Rejection, Reply, Task,
};
pub use processor::{FastCgiProcessor, REMOTE_ADDR, SERVER_SOFTWARE};
pub use response::{CgiResponse, Verdict};

/// Entry point of the `fastcgi` plugin
///
/// # Panics
///
/// * the `rhai` hashing seed cannot be set.
#[allow(unsafe_code)]
#[allow(improper_ctypes_definitions)]
#[no_mangle]
pub extern "C" fn module_entrypoint() -> rhai::Shared<rhai::Module> {
    #[allow(clippy::unwrap_used)]
    rhai::config::hashing::set_ahash_seed(Some([1, 2, 3, 4])).unwrap();

    #[cfg(debug_assertions)]
    {
        dbg!(std::any::TypeId::of::<rhai::Map>());
    }

    rhai::exported_module!(api::vsmtp_plugin_fastcgi).into()
}
