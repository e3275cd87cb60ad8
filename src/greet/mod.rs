//! The greeting service: five methods, one per exchange shape plus a slow
//! unary call used to exercise deadlines.

mod client;
mod server;

pub use client::GreetClient;
pub use server::{GreetService, GreetServiceConfig};

pub const GREET: &str = "greet.GreetService/Greet";
pub const GREET_MANY_TIMES: &str = "greet.GreetService/GreetManyTimes";
pub const LONG_GREET: &str = "greet.GreetService/LongGreet";
pub const GREET_EVERYONE: &str = "greet.GreetService/GreetEveryone";
pub const GREET_WITH_DEADLINE: &str = "greet.GreetService/GreetWithDeadline";

/// Every method path the service registers.
pub const METHODS: [&str; 5] = [
    GREET,
    GREET_MANY_TIMES,
    LONG_GREET,
    GREET_EVERYONE,
    GREET_WITH_DEADLINE,
];

pub fn hello(first_name: &str) -> String {
    format!("Hello {first_name}")
}
