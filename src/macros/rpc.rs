//! Macro for generating pooled RPC method wrappers over first-success dispatch.

/// Generates a typed RPC method that rotates across the pool until one
/// endpoint succeeds.
///
/// # Variants
///
/// ## No arguments
/// ```ignore
/// multiplex_rpc!(
///     /// Doc comment
///     fn method_name() -> ReturnType
/// );
/// ```
///
/// ## Copy arguments
/// ```ignore
/// multiplex_rpc!(
///     /// Doc comment
///     fn method_name(arg: ArgType) -> ReturnType
/// );
/// ```
///
/// ## Clone arguments (specify which args to clone)
/// ```ignore
/// multiplex_rpc!(
///     /// Doc comment
///     @clone [arg]
///     fn method_name(arg: ArgType) -> ReturnType
/// );
/// ```
///
/// ## With Option unwrapping (errors on None)
/// ```ignore
/// multiplex_rpc!(
///     /// Doc comment
///     fn method_name(arg: ArgType) -> ReturnType; or ErrorVariant
/// );
/// ```
#[allow(unused_macros)]
macro_rules! multiplex_rpc {
    // Main pattern: zero or more Copy args, optional error variant for None
    (
        $(#[$meta:meta])*
        fn $method:ident ($($($arg:ident: $arg_ty:ty),+)?) -> $ret:ty $(; or $err:ident)?
    ) => {
        $(#[$meta])*
        pub async fn $method (&self $(, $($arg: $arg_ty),+)?) -> Result<$ret, Error> {
            let result = self
                .first_success(move |provider| async move {
                    provider.$method($($($arg),+)?).await
                })
                .await;
            multiplex_rpc!(@unwrap result $(, $err)?)
        }
    };

    // Arguments that need cloning into each attempt use @clone
    (
        $(#[$meta:meta])*
        @clone [$($clone_arg:ident),+]
        fn $method:ident (
            $($arg:ident: $arg_ty:ty),+
        ) -> $ret:ty $(; or $err:ident)?
    ) => {
        $(#[$meta])*
        pub async fn $method (&self, $($arg: $arg_ty),+) -> Result<$ret, Error> {
            let result = self
                .first_success(move |provider| {
                    $(let $clone_arg = $clone_arg.clone();)+
                    async move {
                        provider.$method($($arg),+).await
                    }
                })
                .await;
            multiplex_rpc!(@unwrap result $(, $err)?)
        }
    };

    // Internal helper for unwrapping
    (@unwrap $result:expr) => {
        $result
    };

    (@unwrap $result:expr, $err:ident) => {
        $result?.ok_or(Error::$err)
    };
}
