//! 能力注册表
//!
//! 显式构造的 `Registry` 值（而非全局状态）：记录具备能力的类型、子类型关系，
//! 以及旁路方法表 `(类型名, 方法名) -> MethodSpec`，后者无需修改类型本身即可附加能力。

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::cache::{DomainObject, ObjectCache, ObjectRef, Value};

/// 以 `_` 开头的方法不暴露
pub const EXCLUSION_MARKER: char = '_';

/// 参数语义类型
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Any,
    Object(String),
    Optional(Box<ParamType>),
    List(Box<ParamType>),
    Map(Box<ParamType>),
}

impl ParamType {
    pub fn object(name: impl Into<String>) -> Self {
        ParamType::Object(name.into())
    }

    pub fn optional(inner: ParamType) -> Self {
        ParamType::Optional(Box::new(inner))
    }

    pub fn list(inner: ParamType) -> Self {
        ParamType::List(Box::new(inner))
    }

    pub fn map(inner: ParamType) -> Self {
        ParamType::Map(Box::new(inner))
    }

    /// 签名中的类型写法，如 `list[User]`、`Optional[str]`
    pub fn display_name(&self) -> String {
        match self {
            ParamType::String => "str".into(),
            ParamType::Integer => "int".into(),
            ParamType::Number => "float".into(),
            ParamType::Boolean => "bool".into(),
            ParamType::Any => "Any".into(),
            ParamType::Object(name) => name.clone(),
            ParamType::Optional(inner) => format!("Optional[{}]", inner.display_name()),
            ParamType::List(inner) => format!("list[{}]", inner.display_name()),
            ParamType::Map(inner) => format!("dict[str, {}]", inner.display_name()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ParamSpec {
    pub name: String,
    pub ty: ParamType,
    /// 有默认值，可省略
    pub optional: bool,
}

/// 处理器收到的旁路参数：缓存副本、原始请求文本、顶层 API 会话句柄。
///
/// 处理器对缓存副本的修改在调用返回后写回会话缓存。
#[derive(Clone, Debug)]
pub struct SideChannel {
    pub cache: ObjectCache,
    pub request: String,
    pub api: Option<ObjectRef>,
}

/// 一次能力调用
pub struct CapabilityCall {
    pub target: ObjectRef,
    /// 已完成引用解析的命名参数
    pub args: BTreeMap<String, Value>,
    /// 仅开放式方法会收到
    pub side_channel: Option<SideChannel>,
}

impl CapabilityCall {
    pub fn target_as<T: DomainObject>(&self) -> Result<&T, String> {
        self.target
            .as_any()
            .downcast_ref::<T>()
            .ok_or_else(|| format!("target is a {}, not the expected type", self.target.type_name()))
    }

    pub fn arg(&self, name: &str) -> Option<&Value> {
        self.args.get(name).filter(|v| !v.is_null())
    }

    pub fn str_arg(&self, name: &str) -> Result<&str, String> {
        match self.arg(name) {
            Some(Value::Str(s)) => Ok(s),
            Some(other) => Err(format!("argument `{name}` must be a string, got {}", other.kind())),
            None => Err(format!("missing required argument `{name}`")),
        }
    }

    pub fn int_arg(&self, name: &str) -> Result<i64, String> {
        match self.arg(name) {
            Some(Value::Int(i)) => Ok(*i),
            Some(other) => Err(format!("argument `{name}` must be an integer, got {}", other.kind())),
            None => Err(format!("missing required argument `{name}`")),
        }
    }

    pub fn object_arg(&self, name: &str) -> Result<ObjectRef, String> {
        match self.arg(name) {
            Some(Value::Object(o)) => Ok(o.clone()),
            Some(Value::Str(s)) => Err(format!("argument `{name}` references unknown object {s}")),
            Some(other) => Err(format!("argument `{name}` must be an object, got {}", other.kind())),
            None => Err(format!("missing required argument `{name}`")),
        }
    }
}

/// 处理器的返回：原始结果或错误文本，以及（开放式方法）改动后的旁路参数
pub struct HandlerOutput {
    pub result: Result<Value, String>,
    pub side_channel: Option<SideChannel>,
}

/// 能力处理器
#[async_trait]
pub trait CapabilityHandler: Send + Sync {
    async fn call(&self, call: CapabilityCall) -> HandlerOutput;
}

struct FnHandler<F>(Arc<F>);

/// 同步闭包放到阻塞线程池执行
#[async_trait]
impl<F> CapabilityHandler for FnHandler<F>
where
    F: Fn(&mut CapabilityCall) -> Result<Value, String> + Send + Sync + 'static,
{
    async fn call(&self, mut call: CapabilityCall) -> HandlerOutput {
        let f = Arc::clone(&self.0);
        let joined = tokio::task::spawn_blocking(move || {
            let result = f(&mut call);
            HandlerOutput {
                result,
                side_channel: call.side_channel,
            }
        })
        .await;
        joined.unwrap_or_else(|e| HandlerOutput {
            result: Err(format!("capability handler panicked: {e}")),
            side_channel: None,
        })
    }
}

/// 同步闭包适配为处理器
pub fn handler_fn<F>(f: F) -> Arc<dyn CapabilityHandler>
where
    F: Fn(&mut CapabilityCall) -> Result<Value, String> + Send + Sync + 'static,
{
    Arc::new(FnHandler(Arc::new(f)))
}

/// 方法描述：签名、文档与处理器
#[derive(Clone)]
pub struct MethodSpec {
    pub name: String,
    pub doc: String,
    pub params: Vec<ParamSpec>,
    pub returns: Option<String>,
    /// 签名末尾接受开放式参数：调用时注入旁路参数
    pub open_ended: bool,
    pub excluded: bool,
    pub handler: Arc<dyn CapabilityHandler>,
}

impl fmt::Debug for MethodSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodSpec")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("returns", &self.returns)
            .field("open_ended", &self.open_ended)
            .field("excluded", &self.excluded)
            .finish()
    }
}

impl MethodSpec {
    pub fn new(
        name: impl Into<String>,
        doc: impl Into<String>,
        handler: Arc<dyn CapabilityHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            doc: doc.into(),
            params: Vec::new(),
            returns: None,
            open_ended: false,
            excluded: false,
            handler,
        }
    }

    pub fn param(mut self, name: impl Into<String>, ty: ParamType) -> Self {
        self.params.push(ParamSpec {
            name: name.into(),
            ty,
            optional: false,
        });
        self
    }

    pub fn optional_param(mut self, name: impl Into<String>, ty: ParamType) -> Self {
        self.params.push(ParamSpec {
            name: name.into(),
            ty,
            optional: true,
        });
        self
    }

    pub fn returns(mut self, ty: impl Into<String>) -> Self {
        self.returns = Some(ty.into());
        self
    }

    pub fn open_ended(mut self) -> Self {
        self.open_ended = true;
        self
    }

    pub fn exclude(mut self) -> Self {
        self.excluded = true;
        self
    }

    pub fn is_exposed(&self) -> bool {
        !self.excluded && !self.name.starts_with(EXCLUSION_MARKER)
    }

    /// 一行签名，如 `def get_users(self, limit: int = None) -> list[User]`
    pub fn signature(&self) -> String {
        let mut parts = vec!["self".to_string()];
        for p in &self.params {
            let mut s = format!("{}: {}", p.name, p.ty.display_name());
            if p.optional {
                s.push_str(" = None");
            }
            parts.push(s);
        }
        if self.open_ended {
            parts.push("**kwargs".to_string());
        }
        match &self.returns {
            Some(r) => format!("def {}({}) -> {}", self.name, parts.join(", "), r),
            None => format!("def {}({})", self.name, parts.join(", ")),
        }
    }
}

/// 类型描述
#[derive(Clone, Debug)]
pub struct TypeSpec {
    pub name: String,
    pub description: String,
    pub supertypes: Vec<String>,
    pub methods: Vec<MethodSpec>,
}

impl TypeSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            supertypes: Vec::new(),
            methods: Vec::new(),
        }
    }

    pub fn extends(mut self, parent: impl Into<String>) -> Self {
        self.supertypes.push(parent.into());
        self
    }

    pub fn method(mut self, method: MethodSpec) -> Self {
        self.methods.push(method);
        self
    }
}

/// 具备能力的领域类型：返回静态的类型描述
pub trait CapabilityType: DomainObject {
    fn type_spec() -> TypeSpec
    where
        Self: Sized;
}

/// 能力注册表
#[derive(Debug, Default)]
pub struct Registry {
    types: BTreeMap<String, TypeSpec>,
    /// 子类型 → 父类型（未单独注册的子类型）
    lineage: HashMap<String, String>,
    extras: BTreeMap<(String, String), MethodSpec>,
    api_type: Option<String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: CapabilityType>(&mut self) -> &mut Self {
        self.register_spec(T::type_spec())
    }

    pub fn register_spec(&mut self, spec: TypeSpec) -> &mut Self {
        tracing::debug!(type_name = %spec.name, methods = spec.methods.len(), "capability type registered");
        self.types.insert(spec.name.clone(), spec);
        self
    }

    /// 声明 `child` 是已注册类型 `parent` 的子类型
    pub fn register_subtype(&mut self, child: impl Into<String>, parent: impl Into<String>) -> &mut Self {
        self.lineage.insert(child.into(), parent.into());
        self
    }

    /// 旁路方法：附加到类型上而不修改类型
    pub fn register_method(&mut self, type_name: impl Into<String>, method: MethodSpec) -> &mut Self {
        self.extras
            .insert((type_name.into(), method.name.clone()), method);
        self
    }

    /// 顶层 API 会话类型：会话开始时从缓存中找出该类型对象作为旁路句柄
    pub fn set_api_type(&mut self, type_name: impl Into<String>) -> &mut Self {
        self.api_type = Some(type_name.into());
        self
    }

    pub fn api_type(&self) -> Option<&str> {
        self.api_type.as_deref()
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    pub fn type_spec(&self, name: &str) -> Option<&TypeSpec> {
        self.types.get(name)
    }

    /// 自身或祖先链上有已注册类型
    pub fn is_capability_type(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    /// 沿注册的子类型链解析到最近的已注册类型
    fn lookup(&self, name: &str) -> Option<&TypeSpec> {
        let mut current = name;
        for _ in 0..=self.lineage.len() {
            if let Some(spec) = self.types.get(current) {
                return Some(spec);
            }
            current = self.lineage.get(current)?.as_str();
        }
        None
    }

    /// 对象对应的已注册类型描述（自身、注册的子类型链、或对象声明的祖先类型）
    pub fn resolve_object(&self, obj: &ObjectRef) -> Option<&TypeSpec> {
        self.lookup(obj.type_name())
            .or_else(|| obj.supertypes().iter().find_map(|s| self.lookup(s)))
    }

    pub fn is_capability_bearing(&self, value: &Value) -> bool {
        match value {
            Value::Object(obj) => self.resolve_object(obj).is_some(),
            _ => false,
        }
    }

    /// 对象的能力来源类型：自身解析结果、声明的祖先类型，以及这些类型声明的父类型
    fn owner_chain(&self, obj: &ObjectRef) -> Vec<&TypeSpec> {
        let mut pending: Vec<String> = vec![obj.type_name().to_string()];
        pending.extend(obj.supertypes());
        let mut owners: Vec<&TypeSpec> = Vec::new();
        let mut i = 0;
        while i < pending.len() {
            if let Some(spec) = self.lookup(&pending[i]) {
                if !owners.iter().any(|o| o.name == spec.name) {
                    owners.push(spec);
                    pending.extend(spec.supertypes.iter().cloned());
                }
            }
            i += 1;
        }
        owners
    }

    /// 对象可见的方法：来源类型的原生方法加旁路方法，只含暴露的方法；同名方法取最近的来源
    pub fn methods_for(&self, obj: &ObjectRef) -> Vec<(&str, &MethodSpec)> {
        let mut out: Vec<(&str, &MethodSpec)> = Vec::new();
        for owner in self.owner_chain(obj) {
            for method in self.methods_of_type(&owner.name) {
                if !out.iter().any(|(_, m)| m.name == method.name) {
                    out.push((owner.name.as_str(), method));
                }
            }
        }
        out
    }

    /// 某类型名下所有暴露的方法（原生 + 旁路），用于建立检索索引
    pub fn methods_of_type(&self, type_name: &str) -> Vec<&MethodSpec> {
        let native = self
            .types
            .get(type_name)
            .map(|s| s.methods.iter())
            .into_iter()
            .flatten();
        let extra = self
            .extras
            .iter()
            .filter(|((t, _), _)| t == type_name)
            .map(|(_, m)| m);
        native.chain(extra).filter(|m| m.is_exposed()).collect()
    }

    /// 所有开放式方法名（沙箱重写时注入旁路参数）
    pub fn open_ended_method_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .types
            .values()
            .flat_map(|t| t.methods.iter())
            .chain(self.extras.values())
            .filter(|m| m.is_exposed() && m.open_ended)
            .map(|m| m.name.as_str())
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    /// 所有暴露方法名（沙箱注册脚本函数）
    pub fn all_method_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .types
            .values()
            .flat_map(|t| t.methods.iter())
            .chain(self.extras.values())
            .filter(|m| m.is_exposed())
            .map(|m| m.name.as_str())
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::testing::{Dataset, User, Workspace};

    fn registry() -> Registry {
        let mut r = Registry::new();
        r.register::<Workspace>().register::<User>();
        r
    }

    #[test]
    fn test_registered_types_are_capability_bearing() {
        let r = registry();
        assert!(r.is_capability_bearing(&Value::object(Workspace::demo())));
        assert!(!r.is_capability_bearing(&Value::from("text")));
        assert!(!r.is_capability_type("Unknown"));
    }

    #[test]
    fn test_subtype_inherits_capability() {
        let mut r = registry();
        assert!(!r.is_capability_bearing(&Value::object(Dataset::new("d1", "sales"))));
        r.register_subtype("Dataset", "Workspace");
        let ds: ObjectRef = Arc::new(Dataset::new("d1", "sales"));
        assert!(r.is_capability_bearing(&Value::Object(ds.clone())));
        assert_eq!(r.resolve_object(&ds).map(|s| s.name.as_str()), Some("Workspace"));
    }

    #[test]
    fn test_exclusion_rules() {
        let r = registry();
        let ws: ObjectRef = Arc::new(Workspace::demo());
        let names: Vec<&str> = r.methods_for(&ws).iter().map(|(_, m)| m.name.as_str()).collect();
        assert!(names.contains(&"get_users"));
        assert!(!names.contains(&"_internal_sync"));
        assert!(!names.contains(&"delete_everything"));
    }

    #[test]
    fn test_side_table_methods_are_visible_without_touching_type() {
        let mut r = registry();
        let before = r.type_spec("Workspace").map(|s| s.methods.len());
        r.register_method(
            "Workspace",
            MethodSpec::new("summarize", "Summarize the workspace.", handler_fn(|_| Ok(Value::Null)))
                .open_ended(),
        );
        assert_eq!(r.type_spec("Workspace").map(|s| s.methods.len()), before);
        let ws: ObjectRef = Arc::new(Workspace::demo());
        assert!(r.methods_for(&ws).iter().any(|(_, m)| m.name == "summarize"));
        assert_eq!(r.open_ended_method_names(), vec!["summarize"]);
    }

    #[test]
    fn test_signature_rendering() {
        let spec = MethodSpec::new("search", "", handler_fn(|_| Ok(Value::Null)))
            .param("query", ParamType::String)
            .optional_param("owner", ParamType::optional(ParamType::object("User")))
            .returns("list[Dataset]")
            .open_ended();
        assert_eq!(
            spec.signature(),
            "def search(self, query: str, owner: Optional[User] = None, **kwargs) -> list[Dataset]"
        );
    }
}
