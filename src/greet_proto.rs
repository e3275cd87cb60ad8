//! Messages of the `greet.GreetService` protocol.
//!
//! Field tags match `greet.proto`, so these records interoperate with any
//! other protobuf encoder of that schema.

#[derive(Clone, PartialEq, Eq, Hash, prost::Message)]
pub struct Greeting {
    #[prost(string, tag = "1")]
    pub first_name: String,
    #[prost(string, tag = "2")]
    pub last_name: String,
}

impl Greeting {
    pub fn new(first_name: impl Into<String>) -> Self {
        Self {
            first_name: first_name.into(),
            last_name: String::new(),
        }
    }

    pub fn with_last_name(mut self, last_name: impl Into<String>) -> Self {
        self.last_name = last_name.into();
        self
    }
}

/// Requests carrying a single optional greeting.
pub trait GreetingRequest {
    fn greeting(&self) -> Option<&Greeting>;

    /// The greeting's first name, empty if no greeting was sent.
    fn first_name(&self) -> &str {
        self.greeting()
            .map(|greeting| greeting.first_name.as_str())
            .unwrap_or_default()
    }
}

macro_rules! greeting_request {
    ($($request:ident),+ $(,)?) => {
        $(
            #[derive(Clone, PartialEq, prost::Message)]
            pub struct $request {
                #[prost(message, optional, tag = "1")]
                pub greeting: Option<Greeting>,
            }

            impl $request {
                pub fn new(greeting: Greeting) -> Self {
                    Self {
                        greeting: Some(greeting),
                    }
                }
            }

            impl GreetingRequest for $request {
                fn greeting(&self) -> Option<&Greeting> {
                    self.greeting.as_ref()
                }
            }
        )+
    };
}

macro_rules! greeting_response {
    ($($response:ident),+ $(,)?) => {
        $(
            #[derive(Clone, PartialEq, Eq, prost::Message)]
            pub struct $response {
                #[prost(string, tag = "1")]
                pub result: String,
            }

            impl $response {
                pub fn new(result: impl Into<String>) -> Self {
                    Self {
                        result: result.into(),
                    }
                }
            }
        )+
    };
}

greeting_request!(
    GreetRequest,
    GreetManyTimesRequest,
    LongGreetRequest,
    GreetEveryoneRequest,
    GreetWithDeadlineRequest,
);

greeting_response!(
    GreetResponse,
    GreetManyTimesResponse,
    LongGreetResponse,
    GreetEveryoneResponse,
    GreetWithDeadlineResponse,
);
