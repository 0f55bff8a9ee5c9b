//! JavaScript tool: run scripts in an embedded `boa_engine` interpreter.
//!
//! Scripts get `console.log/warn/error` and `callTool(name, args)`, which
//! dispatches through the same registry the orchestration loop uses.
//! The interpreter is single-threaded, so each tool owns one sandbox
//! thread, started on first use, and runs jobs in arrival order. A panic
//! inside the interpreter replaces it with a fresh one; a sandbox thread
//! that is gone is restarted on the next call.

mod host;

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Mutex, PoisonError, Weak, mpsc};

use async_trait::async_trait;
use serde_json::{Value, json};
use skillrun_core::error::{ToolError, panic_message};
use skillrun_core::event::EventSink;
use skillrun_core::tool::{Tool, ToolContext, ToolRegistry};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use host::{Interpreter, RegistryBridge, ScriptOutput};

pub const SCRIPT_TOOL_NAME: &str = "javascript";

struct Job {
    code: String,
    events: Option<EventSink>,
    reply: oneshot::Sender<Result<ScriptOutput, String>>,
}

pub struct JavaScriptTool {
    registry: Weak<ToolRegistry>,
    loop_limit: u64,
    jobs: Mutex<Option<mpsc::Sender<Job>>>,
}

impl JavaScriptTool {
    /// `registry` is the registry this tool is registered in; scripts
    /// reach the other tools through it.
    pub fn new(registry: Weak<ToolRegistry>, loop_limit: u64) -> Self {
        Self {
            registry,
            loop_limit,
            jobs: Mutex::new(None),
        }
    }

    /// Hand a job to the sandbox, starting a new one if none is running.
    fn submit(&self, job: Job) -> Result<(), ToolError> {
        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        let job = match jobs.as_ref() {
            Some(sender) => match sender.send(job) {
                Ok(()) => return Ok(()),
                Err(mpsc::SendError(job)) => {
                    warn!("Script sandbox is gone, restarting");
                    job
                }
            },
            None => job,
        };

        let sender = self.spawn_sandbox()?;
        sender
            .send(job)
            .map_err(|_| ToolError::failed(SCRIPT_TOOL_NAME, "Sandbox is not running"))?;
        *jobs = Some(sender);
        Ok(())
    }

    /// Forget the current sandbox so the next call starts another.
    fn discard_sandbox(&self) {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    fn spawn_sandbox(&self) -> Result<mpsc::Sender<Job>, ToolError> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let bridge = RegistryBridge {
            registry: self.registry.clone(),
            runtime: Handle::current(),
            own_name: SCRIPT_TOOL_NAME.to_string(),
        };
        let loop_limit = self.loop_limit;

        std::thread::Builder::new()
            .name("script-sandbox".into())
            .spawn(move || {
                let start = || {
                    let interpreter = Interpreter::new(bridge.clone(), loop_limit);
                    if let Err(e) = &interpreter {
                        warn!(error = %e, "Script sandbox failed to start");
                    }
                    interpreter
                };
                let mut interpreter = start();

                for Job { code, events, reply } in receiver {
                    let outcome = match interpreter.as_mut() {
                        Ok(interpreter) => catch_unwind(AssertUnwindSafe(|| interpreter.run(&code, events))),
                        Err(e) => Ok(Err(e.clone())),
                    };
                    let outcome = outcome.unwrap_or_else(|payload| {
                        let message = panic_message(payload);
                        warn!(panic = %message, "Script interpreter panicked, replacing it");
                        interpreter = start();
                        Err(format!("Interpreter panicked: {message}"))
                    });
                    let _ = reply.send(outcome);
                }
                debug!("Script sandbox stopped");
            })
            .map_err(|e| ToolError::failed(SCRIPT_TOOL_NAME, format!("Failed to start sandbox: {e}")))?;

        debug!(loop_limit, "Script sandbox started");
        Ok(sender)
    }
}

/// Wrap code using top-level `return` in an immediately-invoked function.
pub fn wrap_code(code: &str) -> String {
    let trimmed = code.trim_start();
    if !code.contains("return") || trimmed.starts_with("(function") || trimmed.starts_with("function") {
        return code.to_string();
    }
    format!("(function(){{\n{code}\n}})()")
}

#[async_trait]
impl Tool for JavaScriptTool {
    fn name(&self) -> &str {
        SCRIPT_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Execute JavaScript code and return the result. Use `return` to produce a value. \
         console.log/warn/error output is captured, and callTool(name, args) invokes other tools \
         and returns their result (it throws an Error on failure)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": "JavaScript code to execute (e.g., '1 + 2', 'return Math.sqrt(16)')"
                },
                "show_console": {
                    "type": "boolean",
                    "description": "Whether to include console output in the response (default: true)",
                    "default": true
                }
            },
            "required": ["code"]
        })
    }

    async fn execute(&self, arguments: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let code = arguments["code"].as_str().unwrap_or_default();
        if code.trim().is_empty() {
            return Err(ToolError::InvalidArguments("JavaScript code is required".into()));
        }
        let show_console = arguments["show_console"].as_bool().unwrap_or(true);
        let wrapped = wrap_code(code);

        let (reply, outcome) = oneshot::channel();
        self.submit(Job {
            code: wrapped.clone(),
            events: ctx.events().cloned(),
            reply,
        })?;

        let output = outcome
            .await
            .map_err(|_| {
                self.discard_sandbox();
                ToolError::failed(SCRIPT_TOOL_NAME, "Sandbox stopped unexpectedly")
            })?
            .map_err(|e| ToolError::failed(SCRIPT_TOOL_NAME, format!("JavaScript error: {e}")))?;

        let mut result = json!({
            "code": wrapped,
            "result": output.value,
            "result_type": output.result_type,
        });
        if show_console && !output.console.is_empty() {
            result["console"] = json!(output.console);
        }
        Ok(result)
    }
}
