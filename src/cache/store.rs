//! 对象缓存：会话内的 CacheKey → Value 映射
//!
//! 能力执行结果与沙箱副作用写入缓存；参数中的缓存引用在调用前解析为实际值。
//! 除 DECLINE 回滚（只弹出消息）外缓存单调增长。

use std::collections::{BTreeMap, HashMap};

use crate::cache::key::{is_reference, CacheKey, LAST_OUTPUT_KEY};
use crate::cache::{render, Value};
use crate::core::CacheError;

/// 单个列表结果最多自动注册的元素数
pub const AUTO_REGISTER_LIMIT: usize = 3;

/// 对象缓存
#[derive(Clone, Debug, Default)]
pub struct ObjectCache {
    entries: HashMap<CacheKey, Value>,
}

impl ObjectCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以自动推导的类型标签生成新键并存入
    pub fn put(&mut self, value: Value) -> CacheKey {
        let key = CacheKey::generate(&value.type_tag());
        self.entries.insert(key.clone(), value);
        key
    }

    /// 以指定键存入（初始化缓存或恢复检查点时使用），返回被覆盖的旧值
    pub fn insert(&mut self, key: CacheKey, value: Value) -> Option<Value> {
        self.entries.insert(key, value)
    }

    /// 未知键返回 None
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn require(&self, key: &str) -> Result<&Value, CacheError> {
        self.get(key).ok_or_else(|| CacheError::NotFound(key.to_string()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CacheKey, &Value)> {
        self.entries.iter()
    }

    /// 覆盖保留键 `_LAST_OUTPUT`
    pub fn set_last_output(&mut self, value: Value) {
        self.entries.insert(CacheKey::last_output(), value);
    }

    pub fn last_output(&self) -> Option<&Value> {
        self.entries.get(LAST_OUTPUT_KEY)
    }

    /// 递归替换参数树中指向已存在条目的引用字符串；其余字符串保持不变
    pub fn resolve_references(&self, tree: &Value) -> Value {
        match tree {
            Value::Str(s) if is_reference(s) => match self.entries.get(s.as_str()) {
                Some(v) => v.clone(),
                None => tree.clone(),
            },
            Value::List(items) => {
                Value::List(items.iter().map(|v| self.resolve_references(v)).collect())
            }
            Value::Map(map) => Value::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.resolve_references(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// 对整组命名参数做引用解析
    pub fn resolve_args(&self, args: &BTreeMap<String, Value>) -> BTreeMap<String, Value> {
        args.iter()
            .map(|(k, v)| (k.clone(), self.resolve_references(v)))
            .collect()
    }

    /// 执行结果自动注册：≤3 个元素的列表逐个注册其中具备能力的元素，
    /// 其他结果视为单个值，具备能力时注册。返回新键。
    pub fn auto_register(
        &mut self,
        raw: &Value,
        is_capability_bearing: impl Fn(&Value) -> bool,
    ) -> Vec<CacheKey> {
        let candidates: Vec<&Value> = match raw {
            Value::List(items) if items.len() <= AUTO_REGISTER_LIMIT => items.iter().collect(),
            other => vec![other],
        };
        candidates
            .into_iter()
            .filter(|v| is_capability_bearing(v))
            .map(|v| self.put(v.clone()))
            .collect()
    }

    /// 按谓词将条目分为两组，键有序，便于 prompt 稳定输出
    pub fn partition(
        &self,
        is_capability_bearing: impl Fn(&Value) -> bool,
    ) -> (BTreeMap<String, &Value>, BTreeMap<String, &Value>) {
        let mut bearing = BTreeMap::new();
        let mut other = BTreeMap::new();
        for (k, v) in &self.entries {
            if k.as_str() == LAST_OUTPUT_KEY {
                continue;
            }
            if is_capability_bearing(v) {
                bearing.insert(k.to_string(), v);
            } else {
                other.insert(k.to_string(), v);
            }
        }
        (bearing, other)
    }

    /// 最小编码的缓存清单（JSON 文本）
    pub fn render_minimal(entries: &BTreeMap<String, &Value>) -> String {
        let map: serde_json::Map<String, serde_json::Value> = entries
            .iter()
            .map(|(k, v)| (k.clone(), render::minimal(v)))
            .collect();
        serde_json::to_string_pretty(&map).unwrap_or_else(|_| "{}".to_string())
    }

    /// 找到第一个类型名匹配的对象
    pub fn find_by_type(&self, type_name: &str) -> Option<(&CacheKey, &Value)> {
        self.entries.iter().find(|(_, v)| {
            v.as_object()
                .map(|o| o.type_name() == type_name)
                .unwrap_or(false)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::DomainObject;
    use serde_json::json;
    use std::any::Any;

    #[derive(Debug)]
    struct User(&'static str);

    impl DomainObject for User {
        fn type_name(&self) -> &str {
            "User"
        }
        fn content(&self) -> serde_json::Value {
            json!({ "username": self.0 })
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn is_user(v: &Value) -> bool {
        v.downcast::<User>().is_some()
    }

    #[test]
    fn test_put_then_get_returns_value() {
        let mut cache = ObjectCache::new();
        let user = Value::object(User("alice"));
        let key = cache.put(user.clone());
        assert_eq!(cache.get(key.as_str()), Some(&user));
        assert_eq!(key.tag(), "USER");

        let data_key = cache.put(Value::from(vec![Value::Int(1)]));
        assert_eq!(data_key.tag(), "LIST");
        assert!(cache.get("_USER_00000000").is_none());
        assert!(matches!(cache.require("_USER_00000000"), Err(CacheError::NotFound(_))));
    }

    #[test]
    fn test_resolve_references_nested() {
        let mut cache = ObjectCache::new();
        let user = Value::object(User("alice"));
        let key = cache.put(user.clone());
        let mut inner = BTreeMap::new();
        inner.insert("owner".to_string(), Value::from(key.as_str()));
        inner.insert("note".to_string(), Value::from("plain text"));
        let tree = Value::List(vec![
            Value::Map(inner),
            Value::List(vec![Value::from(key.as_str()), Value::from("_USER_deadbeef")]),
        ]);

        let resolved = cache.resolve_references(&tree);
        let Value::List(items) = &resolved else { panic!("expected list") };
        let Value::Map(map) = &items[0] else { panic!("expected map") };
        assert_eq!(map["owner"], user);
        assert_eq!(map["note"], Value::from("plain text"));
        let Value::List(nested) = &items[1] else { panic!("expected list") };
        assert_eq!(nested[0], user);
        // 格式正确但不存在的键保持原样
        assert_eq!(nested[1], Value::from("_USER_deadbeef"));

        // 不含有效引用时幂等
        assert_eq!(cache.resolve_references(&resolved), resolved);
    }

    #[test]
    fn test_auto_register_bounds_list_growth() {
        let mut cache = ObjectCache::new();
        let small = Value::List(vec![
            Value::object(User("a")),
            Value::Int(1),
            Value::object(User("b")),
        ]);
        let keys = cache.auto_register(&small, is_user);
        assert_eq!(keys.len(), 2);

        let large = Value::List((0..4).map(|_| Value::object(User("x"))).collect());
        let keys = cache.auto_register(&large, is_user);
        assert!(keys.is_empty());
        assert_eq!(cache.len(), 2);

        let single = Value::object(User("c"));
        assert_eq!(cache.auto_register(&single, is_user).len(), 1);
        assert!(cache.auto_register(&Value::from("text"), is_user).is_empty());
    }

    #[test]
    fn test_last_output_is_overwritten_and_excluded_from_partition() {
        let mut cache = ObjectCache::new();
        cache.set_last_output(Value::Int(1));
        cache.set_last_output(Value::from("second"));
        assert_eq!(cache.last_output(), Some(&Value::from("second")));
        cache.put(Value::object(User("a")));
        cache.put(Value::from("note"));
        let (bearing, other) = cache.partition(is_user);
        assert_eq!(bearing.len(), 1);
        assert_eq!(other.len(), 1);
    }

    #[test]
    fn test_render_minimal_lists_keys() {
        let mut cache = ObjectCache::new();
        let key = cache.put(Value::object(User("alice")));
        let (bearing, _) = cache.partition(is_user);
        let text = ObjectCache::render_minimal(&bearing);
        assert!(text.contains(key.as_str()));
        assert!(text.contains("User()"));
    }
}
