//! 集成测试共用的领域类型与编排器装配

#![allow(dead_code)]

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use capability_agent::capability::handler_fn;
use capability_agent::capability::ParamType;
use capability_agent::core::ConfirmationChannel;
use capability_agent::llm::ScriptedLlmClient;
use capability_agent::{
    CacheKey, CapabilityType, DomainObject, MethodSpec, ObjectCache, ObjectRef, Orchestrator,
    OrchestratorBuilder, Registry, TypeSpec, Value,
};

pub const WORKSPACE_KEY: &str = "_WORKSPACE_0a1b2c3d";
pub const USER_LIST_KEY: &str = "_LIST_5e6f7a8b";

#[derive(Debug, Clone)]
pub struct User {
    pub username: String,
}

impl DomainObject for User {
    fn type_name(&self) -> &str {
        "User"
    }
    fn content(&self) -> serde_json::Value {
        json!({ "id": self.username, "username": self.username, "email": format!("{}@example.org", self.username) })
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl CapabilityType for User {
    fn type_spec() -> TypeSpec {
        TypeSpec::new("User", "A registered user.").method(
            MethodSpec::new(
                "get_email",
                "Return the user's email address.",
                handler_fn(|call| {
                    let user = call.target_as::<User>()?;
                    Ok(Value::from(format!("{}@example.org", user.username)))
                }),
            )
            .returns("str"),
        )
    }
}

#[derive(Debug, Clone)]
pub struct Workspace {
    pub users: Vec<String>,
}

impl DomainObject for Workspace {
    fn type_name(&self) -> &str {
        "Workspace"
    }
    fn content(&self) -> serde_json::Value {
        json!({ "id": "ws-1", "name": "research", "users": self.users })
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl CapabilityType for Workspace {
    fn type_spec() -> TypeSpec {
        TypeSpec::new("Workspace", "A workspace groups users and datasets.")
            .method(
                MethodSpec::new(
                    "get_users",
                    "List all users of the workspace.",
                    handler_fn(|call| {
                        let ws = call.target_as::<Workspace>()?;
                        Ok(Value::List(
                            ws.users
                                .iter()
                                .map(|u| Value::object(User { username: u.clone() }))
                                .collect(),
                        ))
                    }),
                )
                .returns("list[User]"),
            )
            .method(
                MethodSpec::new(
                    "find_user",
                    "Find a user by username.\n\nArgs:\n    username (str): exact username.",
                    handler_fn(|call| {
                        let ws = call.target_as::<Workspace>()?;
                        let name = call.str_arg("username")?;
                        ws.users
                            .iter()
                            .find(|u| u.as_str() == name)
                            .map(|u| Value::object(User { username: u.clone() }))
                            .ok_or_else(|| format!("no user named {name}"))
                    }),
                )
                .param("username", ParamType::String)
                .returns("User"),
            )
    }
}

pub fn registry() -> Registry {
    let mut registry = Registry::new();
    registry
        .register::<Workspace>()
        .register::<User>()
        .set_api_type("Workspace");
    registry
}

pub fn workspace() -> ObjectRef {
    Arc::new(Workspace {
        users: vec!["alice".into(), "bob".into(), "carol".into()],
    })
}

/// 一个工作区对象加一份此前取回的用户列表，键固定以便脚本化回复引用
pub fn seeded_cache() -> (ObjectCache, ObjectRef) {
    let ws = workspace();
    let mut cache = ObjectCache::new();
    cache.insert(key(WORKSPACE_KEY), Value::Object(ws.clone()));
    let users = ["alice", "bob", "carol"]
        .iter()
        .map(|u| Value::object(User { username: u.to_string() }))
        .collect::<Vec<_>>();
    cache.insert(key(USER_LIST_KEY), Value::List(users));
    (cache, ws)
}

pub fn key(s: &str) -> CacheKey {
    CacheKey::parse(s).unwrap()
}

pub fn user_keys(cache: &ObjectCache) -> Vec<String> {
    cache
        .iter()
        .filter(|(k, _)| k.as_str().starts_with("_USER_"))
        .map(|(k, _)| k.to_string())
        .collect()
}

pub fn tool_decision() -> String {
    format!("{{\"action\": \"TOOL\", \"focal_object\": \"{WORKSPACE_KEY}\"}}")
}

pub fn code_decision() -> String {
    format!("{{\"action\": \"CODE\", \"focal_object\": \"{WORKSPACE_KEY}\"}}")
}

pub fn builder(llm: Arc<ScriptedLlmClient>) -> OrchestratorBuilder {
    capability_agent::observability::init_for_tests();
    Orchestrator::builder(registry()).with_llm(llm)
}

pub async fn orchestrator(llm: Arc<ScriptedLlmClient>) -> Orchestrator {
    builder(llm).build().await.unwrap()
}

/// 总是拒绝的确认通道
pub struct AlwaysDecline;

#[async_trait]
impl ConfirmationChannel for AlwaysDecline {
    async fn ask(&self, _content: &str) -> bool {
        false
    }
}
