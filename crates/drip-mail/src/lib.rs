//! `drip-mail`: [`MailSender`](drip_core::ports::MailSender) implementations.
//!
//! | Provider | Behaviour                                              |
//! |----------|--------------------------------------------------------|
//! | `http`   | POST rendered message to a transactional-email API     |
//! | `log`    | Render and log; no network. Default for development    |

pub mod sender;

pub use sender::{build_sender, HttpMailSender, LogMailSender};
