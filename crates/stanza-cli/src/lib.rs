//! Library components of the stanza CLI.

pub mod logging;
pub mod site;
