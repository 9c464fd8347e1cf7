//! Recording executor for tests.
//!
//! Every call is recorded in order and handed to a caller-provided handler,
//! which decides the result. Nothing touches the host.

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::exec::Executor;

/// A single recorded executor invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecCall {
    pub label: String,
    pub command: String,
    pub args: Vec<String>,
}

impl ExecCall {
    /// Last word of the label (e.g. `sdx` for `format sdx`).
    pub fn label_suffix(&self) -> &str {
        self.label.rsplit(' ').next().unwrap_or_default()
    }
}

pub type ExecuteFn = dyn FnMut(usize, &ExecCall) -> Result<()> + Send;
pub type OutputFn = dyn FnMut(usize, &ExecCall) -> Result<String> + Send;

pub struct MockExecutor {
    execute_handler: Mutex<Box<ExecuteFn>>,
    output_handler: Mutex<Box<OutputFn>>,
    calls: Mutex<Vec<ExecCall>>,
    output_calls: Mutex<Vec<ExecCall>>,
}

impl MockExecutor {
    /// All commands succeed; probes return empty output.
    pub fn new() -> Self {
        Self {
            execute_handler: Mutex::new(Box::new(|_: usize, _: &ExecCall| -> Result<()> { Ok(()) })),
            output_handler: Mutex::new(Box::new(|_: usize, _: &ExecCall| -> Result<String> {
                Ok(String::new())
            })),
            calls: Mutex::new(Vec::new()),
            output_calls: Mutex::new(Vec::new()),
        }
    }

    /// Handler for `execute`, called with the zero-based call index.
    pub fn on_execute(
        self,
        f: impl FnMut(usize, &ExecCall) -> Result<()> + Send + 'static,
    ) -> Self {
        Self {
            execute_handler: Mutex::new(Box::new(f)),
            ..self
        }
    }

    /// Handler for `execute_with_output`, called with the zero-based call index.
    pub fn on_output(
        self,
        f: impl FnMut(usize, &ExecCall) -> Result<String> + Send + 'static,
    ) -> Self {
        Self {
            output_handler: Mutex::new(Box::new(f)),
            ..self
        }
    }

    pub async fn calls(&self) -> Vec<ExecCall> {
        self.calls.lock().await.clone()
    }

    pub async fn output_calls(&self) -> Vec<ExecCall> {
        self.output_calls.lock().await.clone()
    }

    fn call(label: &str, command: &str, args: &[&str]) -> ExecCall {
        ExecCall {
            label: label.to_string(),
            command: command.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

impl Default for MockExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Executor for MockExecutor {
    async fn execute(&self, label: &str, command: &str, args: &[&str]) -> Result<()> {
        let call = Self::call(label, command, args);
        let index = {
            let mut calls = self.calls.lock().await;
            calls.push(call.clone());
            calls.len() - 1
        };
        tracing::debug!("mock execute {} for {}: {} {:?}", index, label, command, args);
        let mut handler = self.execute_handler.lock().await;
        (*handler)(index, &call)
    }

    async fn execute_with_output(
        &self,
        label: &str,
        command: &str,
        args: &[&str],
    ) -> Result<String> {
        let call = Self::call(label, command, args);
        let index = {
            let mut calls = self.output_calls.lock().await;
            calls.push(call.clone());
            calls.len() - 1
        };
        tracing::debug!("mock output execute {} for {}: {} {:?}", index, label, command, args);
        let mut handler = self.output_handler.lock().await;
        (*handler)(index, &call)
    }
}
