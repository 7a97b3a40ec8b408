//! SOAP transport and receipt interpretation for the sendBill service.
//!
//! [`client`] builds the WS-Security envelope and talks to the authority;
//! [`cdr`] turns the raw reply into a normalized [`crate::core::SubmissionResult`].

pub mod cdr;
pub mod client;

pub use cdr::interpret;
pub use client::{BillSender, SoapBillClient, SoapReply};
