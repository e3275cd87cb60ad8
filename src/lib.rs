pub mod config;
pub mod greet;
pub mod greet_proto;
pub mod rpc;

pub use greet::{GreetClient, GreetService, GreetServiceConfig};
