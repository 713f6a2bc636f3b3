//! 能力物化：把注册表中的方法变成带 Schema 的可调用能力
//!
//! 调用前对整组参数做缓存引用解析；开放式方法额外收到旁路参数（缓存、请求文本、API 句柄）。
//! 调用失败与超时都转为文本结果，不向上传播；每次调用输出结构化审计日志（JSON）。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::time::timeout;

use crate::cache::{render, ObjectCache, ObjectRef, Value};
use crate::capability::schema::{args_schema, classify, Bearing};
use crate::capability::{docstring, CapabilityCall, MethodSpec, Registry, SideChannel};
use crate::llm::ToolDefinition;

/// 能力失败时结果文本的前缀
pub const ERROR_PREFIX: &str = "An error occurred while executing the tool:";

#[derive(Clone, Debug, Serialize)]
pub struct ParamDescriptor {
    pub name: String,
    pub semantic_type: String,
    pub optional: bool,
    pub bearing: Bearing,
}

/// 能力描述：名称、所属类型、参数与可读描述
#[derive(Clone, Debug, Serialize)]
pub struct CapabilityDescriptor {
    pub name: String,
    pub owner: String,
    pub params: Vec<ParamDescriptor>,
    pub description: String,
    pub returns: Option<String>,
}

/// 调用上下文（旁路参数来源）
pub struct InvocationContext<'a> {
    pub cache: &'a mut ObjectCache,
    pub request: &'a str,
    pub api: Option<ObjectRef>,
}

/// 调用结果：文本总是存在，原始值仅在成功时存在
#[derive(Clone, Debug)]
pub struct CapabilityOutcome {
    pub text: String,
    pub raw: Option<Value>,
    pub ok: bool,
}

/// 物化后的能力
#[derive(Clone, Debug)]
pub struct MaterializedCapability {
    pub descriptor: CapabilityDescriptor,
    parameters: serde_json::Value,
    spec: MethodSpec,
    timeout: Duration,
}

impl MaterializedCapability {
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn owner(&self) -> &str {
        &self.descriptor.owner
    }

    pub fn args_schema(&self) -> &serde_json::Value {
        &self.parameters
    }

    pub fn is_open_ended(&self) -> bool {
        self.spec.open_ended
    }

    pub fn param_count(&self) -> usize {
        self.spec.params.len()
    }

    pub fn tool_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.descriptor.name.clone(),
            description: self.descriptor.description.clone(),
            parameters: self.parameters.clone(),
        }
    }

    /// 位置参数按声明顺序绑定为命名参数
    pub fn bind_positional(&self, args: Vec<Value>) -> Result<BTreeMap<String, Value>, String> {
        if args.len() > self.spec.params.len() {
            return Err(format!(
                "{}() takes at most {} arguments but {} were given",
                self.descriptor.name,
                self.spec.params.len(),
                args.len()
            ));
        }
        Ok(self
            .spec
            .params
            .iter()
            .zip(args)
            .map(|(p, v)| (p.name.clone(), v))
            .collect())
    }

    /// 解析引用、注入旁路参数并调用；失败与超时转为文本
    pub async fn invoke(
        &self,
        target: &ObjectRef,
        args: BTreeMap<String, Value>,
        ctx: InvocationContext<'_>,
    ) -> CapabilityOutcome {
        let start = Instant::now();
        let args_preview = args_preview(&args);
        let resolved = ctx.cache.resolve_args(&args);
        let side_channel = self.spec.open_ended.then(|| SideChannel {
            cache: ctx.cache.clone(),
            request: ctx.request.to_string(),
            api: ctx.api,
        });
        let call = CapabilityCall {
            target: target.clone(),
            args: resolved,
            side_channel,
        };
        // 超时后阻塞线程上的处理器不会被打断，但会话不再等待它，也不采用它的缓存改动
        let result = match timeout(self.timeout, self.spec.handler.call(call)).await {
            Ok(output) => {
                if let Some(side) = output.side_channel {
                    *ctx.cache = side.cache;
                }
                Ok(output.result)
            }
            Err(elapsed) => Err(elapsed),
        };

        let outcome_label = match &result {
            Ok(Ok(_)) => "ok",
            Ok(Err(_)) => "error",
            Err(_) => "timeout",
        };
        let audit = serde_json::json!({
            "event": "capability_audit",
            "capability": self.descriptor.name,
            "owner": self.descriptor.owner,
            "ok": outcome_label == "ok",
            "outcome": outcome_label,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "capability");

        match result {
            Ok(Ok(raw)) => CapabilityOutcome {
                text: render::result_text(&raw),
                raw: Some(raw),
                ok: true,
            },
            Ok(Err(e)) => CapabilityOutcome {
                text: format!("{ERROR_PREFIX} {e}"),
                raw: None,
                ok: false,
            },
            Err(_) => CapabilityOutcome {
                text: format!(
                    "{ERROR_PREFIX} {} timed out after {}s",
                    self.descriptor.name,
                    self.timeout.as_secs()
                ),
                raw: None,
                ok: false,
            },
        }
    }
}

fn args_preview(args: &BTreeMap<String, Value>) -> String {
    let json: serde_json::Map<String, serde_json::Value> = args
        .iter()
        .map(|(k, v)| (k.clone(), render::minimal(v)))
        .collect();
    let s = serde_json::Value::Object(json).to_string();
    if s.len() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

/// 物化器：持有注册表，按对象生成可调用能力
#[derive(Clone, Debug)]
pub struct Materializer {
    registry: Arc<Registry>,
    full_doc_strings: bool,
    timeout: Duration,
}

impl Materializer {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            full_doc_strings: false,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_full_doc_strings(mut self, full: bool) -> Self {
        self.full_doc_strings = full;
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout = Duration::from_secs(timeout_secs);
        self
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn describe_method(&self, owner: &str, spec: &MethodSpec) -> CapabilityDescriptor {
        CapabilityDescriptor {
            name: spec.name.clone(),
            owner: owner.to_string(),
            params: spec
                .params
                .iter()
                .map(|p| ParamDescriptor {
                    name: p.name.clone(),
                    semantic_type: p.ty.display_name(),
                    optional: p.optional,
                    bearing: classify(&p.ty, &self.registry),
                })
                .collect(),
            description: docstring::describe(&spec.doc, self.full_doc_strings),
            returns: spec.returns.clone(),
        }
    }

    /// 对象的全部暴露能力
    pub fn materialize(&self, obj: &ObjectRef) -> Vec<MaterializedCapability> {
        self.registry
            .methods_for(obj)
            .into_iter()
            .map(|(owner, spec)| MaterializedCapability {
                descriptor: self.describe_method(owner, spec),
                parameters: args_schema(&spec.params, &self.registry),
                spec: spec.clone(),
                timeout: self.timeout,
            })
            .collect()
    }

    pub fn find(&self, obj: &ObjectRef, name: &str) -> Option<MaterializedCapability> {
        self.materialize(obj).into_iter().find(|c| c.name() == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::testing::{User, Workspace};
    use crate::capability::{handler_fn, ParamType};

    fn materializer() -> Materializer {
        let mut r = Registry::new();
        r.register::<Workspace>().register::<User>();
        r.register_method(
            "Workspace",
            MethodSpec::new(
                "cache_report",
                "Report how many objects are cached and which request asked.",
                handler_fn(|call| {
                    let side = call
                        .side_channel
                        .as_ref()
                        .ok_or_else(|| "no side channel".to_string())?;
                    Ok(Value::from(format!(
                        "{} objects for '{}' (api: {})",
                        side.cache.len(),
                        side.request,
                        side.api.is_some()
                    )))
                }),
            )
            .open_ended(),
        );
        r.register_method(
            "Workspace",
            MethodSpec::new(
                "fail",
                "Always fails.",
                handler_fn(|_| Err("backend unavailable".to_string())),
            )
            .param("reason", ParamType::String),
        );
        r.register_method(
            "Workspace",
            MethodSpec::new(
                "remember",
                "Store the request text in the cache.",
                handler_fn(|call| {
                    let side = call
                        .side_channel
                        .as_mut()
                        .ok_or_else(|| "no side channel".to_string())?;
                    let key = side.cache.put(Value::from(side.request.clone()));
                    Ok(Value::from(key.as_str()))
                }),
            )
            .open_ended(),
        );
        r.register_method(
            "Workspace",
            MethodSpec::new(
                "slow",
                "Blocks for two seconds.",
                handler_fn(|_| {
                    std::thread::sleep(Duration::from_secs(2));
                    Ok(Value::from("done"))
                }),
            ),
        );
        Materializer::new(Arc::new(r))
    }

    fn workspace() -> ObjectRef {
        Arc::new(Workspace::demo())
    }

    #[test]
    fn test_materialize_lists_exposed_capabilities() {
        let m = materializer();
        let caps = m.materialize(&workspace());
        let names: Vec<&str> = caps.iter().map(|c| c.name()).collect();
        assert!(names.contains(&"get_users"));
        assert!(names.contains(&"cache_report"));
        assert!(!names.contains(&"_internal_sync"));
        let share = caps.iter().find(|c| c.name() == "share_with").unwrap();
        assert_eq!(share.descriptor.params[0].bearing, Bearing::Object);
        assert_eq!(share.descriptor.params[1].bearing, Bearing::ObjectList);
        assert!(!share.descriptor.description.contains("Notes"));
    }

    #[tokio::test]
    async fn test_invoke_resolves_cache_references() {
        let m = materializer();
        let mut cache = ObjectCache::new();
        let key = cache.put(Value::object(User::new("dora")));
        let cap = m.find(&workspace(), "share_with").unwrap();
        let mut args = BTreeMap::new();
        args.insert("user".to_string(), Value::from(key.as_str()));
        let outcome = cap
            .invoke(
                &workspace(),
                args,
                InvocationContext { cache: &mut cache, request: "share", api: None },
            )
            .await;
        assert!(outcome.ok);
        assert_eq!(outcome.text, "shared with dora");
    }

    #[tokio::test]
    async fn test_open_ended_methods_receive_side_channel() {
        let m = materializer();
        let mut cache = ObjectCache::new();
        cache.put(Value::from("x"));
        let cap = m.find(&workspace(), "cache_report").unwrap();
        assert!(cap.is_open_ended());
        let outcome = cap
            .invoke(
                &workspace(),
                BTreeMap::new(),
                InvocationContext { cache: &mut cache, request: "how many?", api: Some(workspace()) },
            )
            .await;
        assert_eq!(outcome.text, "1 objects for 'how many?' (api: true)");
    }

    #[tokio::test]
    async fn test_failures_become_text() {
        let m = materializer();
        let mut cache = ObjectCache::new();
        let cap = m.find(&workspace(), "fail").unwrap();
        let outcome = cap
            .invoke(
                &workspace(),
                BTreeMap::new(),
                InvocationContext { cache: &mut cache, request: "", api: None },
            )
            .await;
        assert!(!outcome.ok);
        assert!(outcome.raw.is_none());
        assert_eq!(
            outcome.text,
            "An error occurred while executing the tool: backend unavailable"
        );
    }

    #[tokio::test]
    async fn test_side_channel_changes_are_written_back() {
        let m = materializer();
        let mut cache = ObjectCache::new();
        let cap = m.find(&workspace(), "remember").unwrap();
        let outcome = cap
            .invoke(
                &workspace(),
                BTreeMap::new(),
                InvocationContext { cache: &mut cache, request: "keep me", api: None },
            )
            .await;
        assert!(outcome.ok);
        assert_eq!(cache.len(), 1);
        assert!(cache.iter().any(|(_, v)| *v == Value::from("keep me")));
    }

    #[tokio::test]
    async fn test_blocking_handler_is_bounded_by_timeout() {
        let m = materializer().with_timeout(1);
        let mut cache = ObjectCache::new();
        let cap = m.find(&workspace(), "slow").unwrap();
        let started = Instant::now();
        let outcome = cap
            .invoke(
                &workspace(),
                BTreeMap::new(),
                InvocationContext { cache: &mut cache, request: "", api: None },
            )
            .await;
        assert!(started.elapsed() < Duration::from_millis(1900));
        assert!(!outcome.ok);
        assert!(outcome.text.ends_with("slow timed out after 1s"));
    }

    #[test]
    fn test_bind_positional() {
        let m = materializer();
        let cap = m.find(&workspace(), "find_user").unwrap();
        let bound = cap.bind_positional(vec![Value::from("alice")]).unwrap();
        assert_eq!(bound["username"], Value::from("alice"));
        assert!(cap.bind_positional(vec![Value::Null, Value::Null]).is_err());
    }
}
