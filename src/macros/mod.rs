#[macro_use]
mod logging;
#[macro_use]
mod rpc;
