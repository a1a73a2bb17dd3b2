//! Typed service clients.
//!
//! [`service_client!`] generates a concrete client struct per service
//! interface whose methods invoke the call pipeline, replacing runtime
//! reflection with a compile-time builder.

/// Generate a typed client for a service interface.
///
/// Each declared method becomes an async method taking `impl Into<Value>`
/// arguments and returning `Result<Value>`; the declared type-name literals
/// are carried as the request's `param_types`.
///
/// # Example
///
/// ```ignore
/// service_client! {
///     pub struct HelloServiceClient, service = "com.example.HelloService" {
///         fn say_hello(name: "String");
///         fn add(a: "i64", b: "i64");
///     }
/// }
///
/// let hello = HelloServiceClient::new(client);
/// let greeting = hello.say_hello("world").await?;
/// ```
#[macro_export]
macro_rules! service_client {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident, service = $service:literal {
            $( fn $method:ident ( $( $arg:ident : $ty:literal ),* $(,)? ); )*
        }
    ) => {
        $(#[$meta])*
        $vis struct $name {
            client: ::std::sync::Arc<$crate::RpcClient>,
        }

        impl $name {
            $vis fn new(client: ::std::sync::Arc<$crate::RpcClient>) -> Self {
                Self { client }
            }

            $vis const SERVICE: &'static str = $service;

            $(
                $vis async fn $method(
                    &self,
                    $( $arg: impl ::std::convert::Into<::airpc_common::Value> ),*
                ) -> ::airpc_common::Result<::airpc_common::Value> {
                    self.client
                        .call(
                            $service,
                            stringify!($method),
                            vec![ $( $ty.to_string() ),* ],
                            vec![ $( $arg.into() ),* ],
                        )
                        .await
                }
            )*
        }
    };
}
