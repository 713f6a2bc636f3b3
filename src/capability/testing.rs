//! 单元测试用领域类型：工作区、用户、数据集

use std::any::Any;
use std::sync::Arc;

use serde_json::json;

use crate::cache::{DomainObject, ObjectRef, Value};
use crate::capability::{handler_fn, CapabilityType, MethodSpec, ParamType, TypeSpec};

#[derive(Debug, Clone)]
pub struct User {
    pub username: String,
    pub email: String,
}

impl User {
    pub fn new(username: &str) -> Self {
        Self {
            username: username.to_string(),
            email: format!("{username}@example.org"),
        }
    }
}

impl DomainObject for User {
    fn type_name(&self) -> &str {
        "User"
    }
    fn content(&self) -> serde_json::Value {
        json!({ "id": self.username, "username": self.username, "email": self.email })
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl CapabilityType for User {
    fn type_spec() -> TypeSpec {
        TypeSpec::new("User", "A registered user of the data platform.").method(
            MethodSpec::new(
                "get_email",
                "Return the user's email address.\n\nReturns:\n    str: the email.",
                handler_fn(|call| {
                    let user = call.target_as::<User>()?;
                    Ok(Value::from(user.email.clone()))
                }),
            )
            .returns("str"),
        )
    }
}

#[derive(Debug, Clone)]
pub struct Dataset {
    pub id: String,
    pub title: String,
}

impl Dataset {
    pub fn new(id: &str, title: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
        }
    }
}

impl DomainObject for Dataset {
    fn type_name(&self) -> &str {
        "Dataset"
    }
    fn content(&self) -> serde_json::Value {
        json!({ "id": self.id, "title": self.title })
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Clone)]
pub struct Workspace {
    pub id: String,
    pub name: String,
    pub users: Vec<User>,
}

impl Workspace {
    pub fn demo() -> Self {
        Self {
            id: "ws-1".into(),
            name: "demo".into(),
            users: vec![User::new("alice"), User::new("bob"), User::new("carol")],
        }
    }
}

impl DomainObject for Workspace {
    fn type_name(&self) -> &str {
        "Workspace"
    }
    fn content(&self) -> serde_json::Value {
        json!({ "id": self.id, "name": self.name, "user_count": self.users.len() })
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
                    "List all users of the workspace.\n\nReturns:\n    list[User]: every user.\n\nNotes:\n    Large workspaces return many users.",
                    handler_fn(|call| {
                        let ws = call.target_as::<Workspace>()?;
                        Ok(Value::List(
                            ws.users
                                .iter()
                                .map(|u| Value::Object(Arc::new(u.clone()) as ObjectRef))
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
                            .find(|u| u.username == name)
                            .map(|u| Value::object(u.clone()))
                            .ok_or_else(|| format!("no user named {name}"))
                    }),
                )
                .param("username", ParamType::String)
                .returns("User"),
            )
            .method(
                MethodSpec::new(
                    "share_with",
                    "Share the workspace with a user.\n\nArgs:\n    user (User): the user to add.",
                    handler_fn(|call| {
                        let user = call.object_arg("user")?;
                        let user = user
                            .as_any()
                            .downcast_ref::<User>()
                            .ok_or_else(|| "argument `user` must be a User".to_string())?;
                        Ok(Value::from(format!("shared with {}", user.username)))
                    }),
                )
                .param("user", ParamType::object("User"))
                .optional_param("cc", ParamType::list(ParamType::object("User")))
                .returns("str"),
            )
            .method(MethodSpec::new(
                "_internal_sync",
                "Internal.",
                handler_fn(|_| Ok(Value::Null)),
            ))
            .method(
                MethodSpec::new(
                    "delete_everything",
                    "Dangerous.",
                    handler_fn(|_| Ok(Value::Null)),
                )
                .exclude(),
            )
    }
}
