//! The interpreter side of the sandbox: a `boa_engine` context with the
//! console and `callTool` host functions installed.
//!
//! Everything here runs on the sandbox thread. `Context` is `!Send`, so
//! per-call state is shared with the host functions through `Rc<RefCell>`.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Weak;

use boa_engine::{Context, JsArgs, JsError, JsResult, JsString, JsValue, NativeFunction, Source, js_string};
use boa_gc::{Finalize, Trace};
use serde_json::{Value, json};
use skillrun_core::error::ToolError;
use skillrun_core::event::{EventSink, StreamEvent};
use skillrun_core::tool::{ToolContext, ToolRegistry};
use tokio::runtime::Handle;
use tracing::debug;

const PRELUDE: &str = include_str!("prelude.js");

/// What one script evaluation produced.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ScriptOutput {
    pub value: Value,
    /// `number`, `string`, `boolean`, `array`, `object` or `null`
    pub result_type: String,
    pub console: Vec<String>,
}

/// Route from script code back into the tool registry.
#[derive(Clone)]
pub(crate) struct RegistryBridge {
    pub registry: Weak<ToolRegistry>,
    pub runtime: Handle,
    /// Name of the script tool itself, which scripts may not call.
    pub own_name: String,
}

impl RegistryBridge {
    /// Run a tool and encode the outcome as `{"ok": result}` or
    /// `{"err": {kind, tool, message, available?}}`.
    fn call(&self, name: &str, raw_args: Option<&str>, events: Option<EventSink>) -> String {
        let Some(registry) = self.registry.upgrade() else {
            return failure("ToolError", name, "Tool registry is no longer available", None);
        };

        if !registry.contains(name) {
            let message = format!("Tool '{name}' not found");
            return failure("ToolNotFound", name, &message, Some(registry.names()));
        }
        if name == self.own_name {
            return failure("ToolError", name, "Scripts cannot call the script tool itself", None);
        }

        let args = match raw_args.map(str::trim).filter(|s| !s.is_empty()) {
            None => json!({}),
            Some(text) => match serde_json::from_str::<Value>(text) {
                Ok(value) => value,
                Err(e) => {
                    return failure("InvalidArgs", name, &format!("Invalid JSON arguments: {e}"), None);
                }
            },
        };

        let ctx = events.map(ToolContext::with_events).unwrap_or_default();
        debug!(tool = name, "Script invoked tool");
        match registry.execute_blocking(&self.runtime, name, args, &ctx) {
            Ok(text) => format!("{{\"ok\":{text}}}"),
            Err(ToolError::InvalidArguments(message)) => failure("InvalidArgs", name, &message, None),
            Err(e) => failure("ToolError", name, &e.to_string(), None),
        }
    }
}

fn failure(kind: &str, tool: &str, message: &str, available: Option<Vec<String>>) -> String {
    let mut err = json!({"kind": kind, "tool": tool, "message": message});
    if let Some(available) = available {
        err["available"] = json!(available);
    }
    json!({ "err": err }).to_string()
}

#[derive(Default)]
struct CallState {
    console: Vec<String>,
    events: Option<EventSink>,
}

impl CallState {
    fn record(&mut self, tool_name: &str, level: &str, message: String) {
        let line = match level {
            "warn" => format!("[WARN] {message}"),
            "error" => format!("[ERROR] {message}"),
            _ => message.clone(),
        };
        self.console.push(line);

        if let Some(sink) = &self.events {
            sink.emit_blocking(StreamEvent::Console {
                tool_name: tool_name.to_string(),
                level: level.to_string(),
                message,
            });
        }
    }
}

/// Rust-side handles the host functions close over. None of them hold
/// garbage-collected values.
#[derive(Clone, Trace, Finalize)]
struct HostCaptures {
    #[unsafe_ignore_trace]
    state: Rc<RefCell<CallState>>,
    #[unsafe_ignore_trace]
    bridge: Rc<RegistryBridge>,
}

/// One long-lived interpreter. Globals defined by a script stay visible
/// to later scripts; the console buffer does not.
pub(crate) struct Interpreter {
    context: Context,
    state: Rc<RefCell<CallState>>,
}

impl Interpreter {
    pub fn new(bridge: RegistryBridge, loop_limit: u64) -> Result<Self, String> {
        let mut context = Context::default();
        context.runtime_limits_mut().set_loop_iteration_limit(loop_limit);

        let state = Rc::new(RefCell::new(CallState::default()));

        let captures = HostCaptures {
            state: Rc::clone(&state),
            bridge: Rc::new(bridge),
        };

        let console = NativeFunction::from_copy_closure_with_captures(
            |_this, args, captures: &HostCaptures, ctx| {
                let level = to_text(args.get_or_undefined(0), ctx)?;
                let message = to_text(args.get_or_undefined(1), ctx)?;
                captures
                    .state
                    .borrow_mut()
                    .record(&captures.bridge.own_name, &level, message);
                Ok(JsValue::undefined())
            },
            captures.clone(),
        );

        let call_tool = NativeFunction::from_copy_closure_with_captures(
            |_this, args, captures: &HostCaptures, ctx| {
                let name = to_text(args.get_or_undefined(0), ctx)?;
                let raw = args.get_or_undefined(1);
                let raw_args = if raw.is_null_or_undefined() {
                    None
                } else {
                    Some(to_text(raw, ctx)?)
                };
                let events = captures.state.borrow().events.clone();
                let reply = captures.bridge.call(&name, raw_args.as_deref(), events);
                Ok(JsValue::from(JsString::from(reply.as_str())))
            },
            captures,
        );

        context
            .register_global_callable(js_string!("__hostConsole"), 2, console)
            .map_err(|e| e.to_string())?;
        context
            .register_global_callable(js_string!("__hostCallTool"), 2, call_tool)
            .map_err(|e| e.to_string())?;
        context
            .eval(Source::from_bytes(PRELUDE))
            .map_err(|e| format!("Failed to install sandbox prelude: {e}"))?;

        Ok(Self { context, state })
    }

    /// Evaluate `code`, capturing console output for this call only.
    pub fn run(&mut self, code: &str, events: Option<EventSink>) -> Result<ScriptOutput, String> {
        {
            let mut state = self.state.borrow_mut();
            state.console.clear();
            state.events = events;
        }

        let outcome = self.evaluate(code);

        let mut state = self.state.borrow_mut();
        state.events = None;
        let console = std::mem::take(&mut state.console);
        outcome.map(|(value, result_type)| ScriptOutput {
            value,
            result_type,
            console,
        })
    }

    fn evaluate(&mut self, code: &str) -> Result<(Value, String), String> {
        let value = self
            .context
            .eval(Source::from_bytes(code))
            .map_err(|e| error_message(&e, &mut self.context))?;

        let describe = self
            .context
            .global_object()
            .get(js_string!("__describe"), &mut self.context)
            .map_err(|e| error_message(&e, &mut self.context))?;
        let Some(describe) = describe.as_callable() else {
            return Err("Sandbox prelude was overwritten".to_string());
        };
        let described = describe
            .call(&JsValue::undefined(), &[value], &mut self.context)
            .map_err(|e| error_message(&e, &mut self.context))?;

        let text = described
            .as_string()
            .map(JsString::to_std_string_escaped)
            .ok_or_else(|| "Result could not be converted".to_string())?;
        let mut described: Value = serde_json::from_str(&text).map_err(|e| e.to_string())?;
        let result_type = described["type"].as_str().unwrap_or("null").to_string();
        Ok((described["value"].take(), result_type))
    }
}

fn to_text(value: &JsValue, ctx: &mut Context) -> JsResult<String> {
    Ok(value.to_string(ctx)?.to_std_string_escaped())
}

/// `Error: message` for native and `Error` objects, the string form of
/// anything else that was thrown.
fn error_message(err: &JsError, ctx: &mut Context) -> String {
    match err.try_native(ctx) {
        Ok(native) => native.to_string(),
        Err(_) => {
            let thrown = err.to_opaque(ctx);
            to_text(&thrown, ctx).unwrap_or_else(|_| "Uncaught exception".to_string())
        }
    }
}
