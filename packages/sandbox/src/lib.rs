// ABOUTME: Sandbox provider package for Patchbox
// ABOUTME: Defines the remote execution contract and the HTTP client implementing it

pub mod http;
pub mod provider;

pub use http::HttpSandboxProvider;
pub use provider::{
    CommandStream, CreateOptions, ExecEvent, Result, RunOptions, SandboxError, SandboxProvider,
    SandboxSession,
};
