//! 运行时值树：数据值与不透明领域对象的统一表示
//!
//! 能力调用的参数、返回值以及对象缓存中的条目都是 `Value`。领域对象以 `ObjectRef`
//! （`Arc<dyn DomainObject>`）形式出现，引擎只通过 trait 观察它们，从不序列化对象本身。

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// 领域对象：类型名、祖先类型、身份字段与数据视图
pub trait DomainObject: fmt::Debug + Send + Sync + 'static {
    /// 运行时类型名（如 `Workspace`），决定缓存键的类型标签
    fn type_name(&self) -> &str;

    /// 祖先类型名，用于判断子类型是否具备能力
    fn supertypes(&self) -> Vec<String> {
        Vec::new()
    }

    /// 对象的数据视图（JSON），用于扩展渲染与字段访问
    fn content(&self) -> serde_json::Value;

    /// 最小身份字段（id / name / title / link），用于 prompt 中的缓存列表
    fn summary(&self) -> Vec<(String, String)> {
        let content = self.content();
        ["id", "name", "title", "link"]
            .iter()
            .filter_map(|field| {
                let v = content.get(*field)?;
                let text = match v {
                    serde_json::Value::String(s) => s.clone(),
                    serde_json::Value::Number(n) => n.to_string(),
                    serde_json::Value::Bool(b) => b.to_string(),
                    _ => return None,
                };
                Some((field.to_string(), text))
            })
            .collect()
    }

    /// 生成代码中 `obj["field"]` / `obj.field` 的属性访问
    fn field(&self, name: &str) -> Option<Value> {
        self.content().get(name).cloned().map(Value::from_json)
    }

    fn as_any(&self) -> &dyn Any;
}

pub type ObjectRef = Arc<dyn DomainObject>;

/// 值树：标量、列表、映射或领域对象
#[derive(Clone, Debug, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Object(ObjectRef),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            // 对象按身份比较
            (Value::Object(a), Value::Object(b)) => {
                Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
            }
            _ => false,
        }
    }
}

impl Value {
    /// 将领域对象包装为值
    pub fn object<T: DomainObject>(obj: T) -> Self {
        Value::Object(Arc::new(obj))
    }

    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(0.0)),
            },
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// 纯数据值转 JSON；含领域对象时返回 None
    pub fn to_json(&self) -> Option<serde_json::Value> {
        Some(match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Value::from(*f),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::List(items) => serde_json::Value::Array(
                items.iter().map(Value::to_json).collect::<Option<Vec<_>>>()?,
            ),
            Value::Map(map) => {
                let mut out = serde_json::Map::new();
                for (k, v) in map {
                    out.insert(k.clone(), v.to_json()?);
                }
                serde_json::Value::Object(out)
            }
            Value::Object(_) => return None,
        })
    }

    /// 缓存键的类型标签：对象取大写类型名，数据取固定标签
    pub fn type_tag(&self) -> String {
        match self {
            Value::Null => "NONE".to_string(),
            Value::Bool(_) => "BOOL".to_string(),
            Value::Int(_) => "INT".to_string(),
            Value::Float(_) => "FLOAT".to_string(),
            Value::Str(_) => "STR".to_string(),
            Value::List(_) => "LIST".to_string(),
            Value::Map(_) => "DICT".to_string(),
            Value::Object(obj) => obj
                .type_name()
                .chars()
                .map(|c| if c.is_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
                .collect(),
        }
    }

    /// 人类可读的类型名（错误信息用）
    pub fn kind(&self) -> &str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Object(obj) => obj.type_name(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// 值树中是否含有领域对象
    pub fn contains_object(&self) -> bool {
        match self {
            Value::Object(_) => true,
            Value::List(items) => items.iter().any(Value::contains_object),
            Value::Map(map) => map.values().any(Value::contains_object),
            _ => false,
        }
    }

    /// 向下转型到具体领域类型
    pub fn downcast<T: DomainObject>(&self) -> Option<&T> {
        self.as_object()?.as_any().downcast_ref::<T>()
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<ObjectRef> for Value {
    fn from(obj: ObjectRef) -> Self {
        Value::Object(obj)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        Value::from_json(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug)]
    struct DataSet {
        name: String,
    }

    impl DomainObject for DataSet {
        fn type_name(&self) -> &str {
            "DataSet"
        }
        fn content(&self) -> serde_json::Value {
            json!({ "id": 7, "name": self.name, "rows": [1, 2] })
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn test_objects_compare_by_identity() {
        let a = Value::object(DataSet { name: "x".into() });
        let b = Value::object(DataSet { name: "x".into() });
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn test_type_tags() {
        assert_eq!(Value::object(DataSet { name: "x".into() }).type_tag(), "DATASET");
        assert_eq!(Value::from(vec![Value::Int(1)]).type_tag(), "LIST");
        assert_eq!(Value::Map(BTreeMap::new()).type_tag(), "DICT");
        assert_eq!(Value::Null.type_tag(), "NONE");
    }

    #[test]
    fn test_json_conversion_rejects_objects() {
        let data = Value::from_json(json!({"a": [1, 2.5, "x", null]}));
        assert_eq!(data.to_json(), Some(json!({"a": [1, 2.5, "x", null]})));
        let mixed = Value::List(vec![Value::object(DataSet { name: "x".into() })]);
        assert!(mixed.to_json().is_none());
        assert!(mixed.contains_object());
    }

    #[test]
    fn test_summary_and_field_default_to_content() {
        let dataset = DataSet { name: "sales".into() };
        let summary = dataset.summary();
        assert_eq!(
            summary,
            vec![("id".to_string(), "7".to_string()), ("name".to_string(), "sales".to_string())]
        );
        assert_eq!(dataset.field("name"), Some(Value::from("sales")));
        assert!(dataset.field("missing").is_none());
    }
}
