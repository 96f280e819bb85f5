#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Counting semaphore for leasehold
//!
//! This crate provides the permit counter the resource pool is built on:
//! a [`Semaphore`] whose ordering strategy ([`Fairness`]) is chosen at
//! construction, the per-caller [`Caller`] handle used for identity and
//! interruption, and the [`WaitObserver`] hook fairness checks plug into.

pub mod caller;
pub mod observer;
pub mod semaphore;

pub use caller::{Caller, CallerId};
pub use observer::WaitObserver;
pub use semaphore::{Fairness, Semaphore};
