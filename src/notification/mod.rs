pub mod arguments;
pub mod dispatcher;
pub mod messages;
pub mod slack;
pub mod webhook;
