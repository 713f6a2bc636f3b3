//! 沙箱工作线程：在阻塞线程上构建 Rhai 引擎并执行一段代码
//!
//! 能力方法在运行时按对象类型分派；异步处理器通过 `Handle::block_on` 驱动。
//! 脚本异常被捕获为文本，不向上传播。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use rhai::{Dynamic, Engine, EvalAltResult, ImmutableString, Map, Scope};
use tokio::runtime::Handle;

use crate::cache::{render, ObjectCache, ObjectRef, Value};
use crate::capability::{InvocationContext, Materializer};
use crate::core::SandboxError;
use crate::sandbox::bridge::{from_dynamic, register_object_type, to_dynamic};
use crate::sandbox::rewrite::SIDE_CHANNEL_ARITY;

/// 无任何输出时的结果文本
pub const EMPTY_OUTPUT: &str = "Code executed successfully with no output.";

pub(crate) struct WorkerInput {
    pub code: String,
    pub focal: Option<ObjectRef>,
    pub cache: ObjectCache,
    pub request: String,
    pub api: Option<ObjectRef>,
    pub materializer: Materializer,
    pub handle: Handle,
    pub max_operations: u64,
    pub deadline: Instant,
}

pub(crate) struct WorkerOutput {
    pub text: String,
    pub cache: ObjectCache,
    pub outputs: usize,
    pub error: Option<SandboxError>,
}

type Shared<T> = Arc<Mutex<T>>;

fn push_line(buf: &Shared<Vec<String>>, line: &str) {
    if let Ok(mut b) = buf.lock() {
        b.push(line.to_string());
    }
}

/// 脚本到能力的分派器
#[derive(Clone)]
struct Dispatcher {
    materializer: Materializer,
    cache: Shared<ObjectCache>,
    request: Arc<str>,
    api: Option<ObjectRef>,
    handle: Handle,
}

impl Dispatcher {
    fn call(&self, method: &str, target: ObjectRef, args: Vec<Dynamic>) -> Result<Dynamic, Box<EvalAltResult>> {
        let cap = self.materializer.find(&target, method).ok_or_else(|| {
            format!("'{}' object has no capability '{method}'", target.type_name())
        })?;
        let mut values: Vec<Value> = args.into_iter().map(from_dynamic).collect();
        // 重写阶段追加的旁路参数；实际旁路由调用上下文提供
        if cap.is_open_ended() && values.len() >= SIDE_CHANNEL_ARITY && values.len() > cap.param_count() {
            values.truncate(values.len() - SIDE_CHANNEL_ARITY);
        }
        let named = cap.bind_positional(values)?;

        let mut cache = self
            .cache
            .lock()
            .map_err(|_| "object cache lock poisoned".to_string())?;
        let outcome = self.handle.block_on(cap.invoke(
            &target,
            named,
            InvocationContext {
                cache: &mut cache,
                request: &self.request,
                api: self.api.clone(),
            },
        ));
        drop(cache);

        if !outcome.ok {
            return Err(outcome.text.into());
        }
        Ok(outcome.raw.map(|v| to_dynamic(&v)).unwrap_or(Dynamic::UNIT))
    }
}

macro_rules! register_arities {
    ($engine:expr, $name:expr, $dispatcher:expr, $( ($($arg:ident),*) ),* $(,)?) => {
        $(
            {
                let d = $dispatcher.clone();
                let method = $name.to_string();
                $engine.register_fn($name, move |target: ObjectRef $(, $arg: Dynamic)*| -> Result<Dynamic, Box<EvalAltResult>> {
                    d.call(&method, target, vec![$($arg),*])
                });
            }
        )*
    };
}

/// 焦点对象在脚本中的变量名
pub fn focal_variable(type_name: &str) -> String {
    let mut name: String = type_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    name
}

fn classify_error(err: &EvalAltResult, max_operations: u64, deadline: Instant, started: Instant) -> SandboxError {
    match err {
        EvalAltResult::ErrorTooManyOperations(_) => {
            tracing::warn!(max_operations, "sandbox operation budget exhausted");
            SandboxError::OperationBudget
        }
        EvalAltResult::ErrorTerminated(..) => {
            SandboxError::Timeout(deadline.saturating_duration_since(started).as_secs())
        }
        other => SandboxError::Script(other.to_string()),
    }
}

pub(crate) fn execute(input: WorkerInput) -> WorkerOutput {
    let started = Instant::now();
    let WorkerInput {
        code,
        focal,
        cache,
        request,
        api,
        materializer,
        handle,
        max_operations,
        deadline,
    } = input;

    let registry = materializer.registry().clone();
    let snapshot = cache.clone();
    let cache: Shared<ObjectCache> = Arc::new(Mutex::new(cache));
    let stdout: Shared<Vec<String>> = Arc::new(Mutex::new(Vec::new()));
    let logs: Shared<Vec<String>> = Arc::new(Mutex::new(Vec::new()));
    let outputs = Arc::new(AtomicUsize::new(0));

    let mut engine = Engine::new();
    engine.set_max_operations(max_operations);
    engine.on_progress(move |_| {
        if Instant::now() >= deadline {
            Some(Dynamic::from(String::from("deadline exceeded")))
        } else {
            None
        }
    });
    {
        let stdout = stdout.clone();
        engine.on_print(move |s| push_line(&stdout, s));
    }
    {
        let logs = logs.clone();
        engine.on_debug(move |s, _, _| push_line(&logs, s));
    }
    register_object_type(&mut engine);

    {
        let cache = cache.clone();
        engine.register_fn("get_from_cache", move |key: ImmutableString| -> Dynamic {
            cache
                .lock()
                .ok()
                .and_then(|c| c.get(key.as_str()).map(to_dynamic))
                .unwrap_or(Dynamic::UNIT)
        });
    }
    {
        let cache = cache.clone();
        let stdout = stdout.clone();
        let outputs = outputs.clone();
        let registry = registry.clone();
        engine.register_fn("output", move |value: Dynamic| -> Result<(), Box<EvalAltResult>> {
            let value = match from_dynamic(value) {
                Value::List(mut items) if items.len() == 1 => items.remove(0),
                other => other,
            };
            let mut cache = cache
                .lock()
                .map_err(|_| "object cache lock poisoned".to_string())?;
            cache.set_last_output(value.clone());
            let keys = cache.auto_register(&value, |v| registry.is_capability_bearing(v));
            drop(cache);
            tracing::debug!(registered = keys.len(), "sandbox output");
            push_line(&stdout, &render::result_text(&value));
            outputs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
    }

    let dispatcher = Dispatcher {
        materializer: materializer.clone(),
        cache: cache.clone(),
        request: Arc::from(request.as_str()),
        api: api.clone(),
        handle,
    };
    for name in registry.all_method_names() {
        register_arities!(
            engine, name, dispatcher,
            (),
            (a),
            (a, b),
            (a, b, c),
            (a, b, c, d),
            (a, b, c, d, e),
            (a, b, c, d, e, f),
            (a, b, c, d, e, f, g),
            (a, b, c, d, e, f, g, h),
        );
    }

    let mut scope = Scope::new();
    if let Some(obj) = focal {
        scope.push(focal_variable(obj.type_name()), obj);
    }
    let mut cache_map = Map::new();
    for (key, value) in snapshot.iter() {
        cache_map.insert(key.as_str().into(), to_dynamic(value));
    }
    scope.push("object_cache", cache_map);
    scope.push("initial_query", request);
    match api {
        Some(api) => scope.push("api_session", api),
        None => scope.push_dynamic("api_session", Dynamic::UNIT),
    };

    let result = engine.run_with_scope(&mut scope, &code);
    drop(scope);
    drop(engine);

    let mut lines: Vec<String> = stdout.lock().map(|b| b.clone()).unwrap_or_default();
    lines.extend(logs.lock().map(|b| b.clone()).unwrap_or_default());
    let error = result
        .err()
        .map(|e| classify_error(&e, max_operations, deadline, started));
    if let Some(e) = &error {
        lines.push(format!("Error: {e}"));
    }
    let text = if lines.is_empty() {
        EMPTY_OUTPUT.to_string()
    } else {
        lines.join("\n")
    };
    let cache = cache.lock().map(|c| c.clone()).unwrap_or(snapshot);

    WorkerOutput {
        text,
        cache,
        outputs: outputs.load(Ordering::SeqCst),
        error,
    }
}
