//! 值渲染：最小编码（prompt 中列出缓存）与扩展编码（执行结果文本）

use serde_json::{json, Value as Json};

use crate::cache::Value;

/// 扩展渲染时对象嵌套的最大深度
const MAX_DEPTH: usize = 6;

/// 最小编码：对象只保留身份字段，如 `Workspace(id='1', name='demo')`
pub fn minimal(value: &Value) -> Json {
    match value {
        Value::Object(obj) => {
            let fields = obj
                .summary()
                .into_iter()
                .map(|(k, v)| format!("{k}='{v}'"))
                .collect::<Vec<_>>()
                .join(", ");
            Json::String(format!("{}({})", obj.type_name(), fields))
        }
        Value::List(items) => Json::Array(items.iter().map(minimal).collect()),
        Value::Map(map) => Json::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), minimal(v)))
                .collect(),
        ),
        other => other.to_json().unwrap_or(Json::Null),
    }
}

/// 扩展编码：对象展开为其数据视图
pub fn extended(value: &Value) -> Json {
    extended_at(value, 0)
}

fn extended_at(value: &Value, depth: usize) -> Json {
    if depth > MAX_DEPTH {
        return Json::String("...".to_string());
    }
    match value {
        Value::Object(obj) => {
            let content = obj.content();
            if content.is_null() {
                json!({ "__type__": obj.type_name() })
            } else {
                content
            }
        }
        Value::List(items) => Json::Array(
            items.iter().map(|v| extended_at(v, depth + 1)).collect(),
        ),
        Value::Map(map) => Json::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), extended_at(v, depth + 1)))
                .collect(),
        ),
        other => other.to_json().unwrap_or(Json::Null),
    }
}

/// 执行结果文本：字符串原样输出，其余为扩展编码的 JSON
pub fn result_text(value: &Value) -> String {
    match value {
        Value::Str(s) => s.clone(),
        other => serde_json::to_string_pretty(&extended(other))
            .unwrap_or_else(|_| format!("{other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::DomainObject;
    use std::any::Any;

    #[derive(Debug)]
    struct Doc;

    impl DomainObject for Doc {
        fn type_name(&self) -> &str {
            "Workspace"
        }
        fn content(&self) -> Json {
            json!({ "id": "w1", "name": "demo", "description": "long text" })
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn test_minimal_keeps_identity_fields() {
        let v = Value::List(vec![Value::object(Doc), Value::Int(3)]);
        assert_eq!(
            minimal(&v),
            json!(["Workspace(id='w1', name='demo')", 3])
        );
    }

    #[test]
    fn test_extended_expands_content() {
        let v = Value::object(Doc);
        assert_eq!(extended(&v)["description"], json!("long text"));
    }

    #[test]
    fn test_result_text_for_strings_is_raw() {
        assert_eq!(result_text(&Value::from("done")), "done");
        assert_eq!(result_text(&Value::Int(4)), "4");
    }
}
