pub mod event;
pub mod identity;
pub mod provider;
pub mod request;
pub mod reviewer;
pub mod rule;
