//! CLI surface: argument parsing (`args`) and the dispatcher that turns
//! parsed arguments into a resolved run (`dispatch`).

pub mod args;
pub mod dispatch;
