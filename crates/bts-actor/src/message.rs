//! Request and response messages exchanged with actors.

use bts_core::{Delta, EntityMeta, Error, NodeKey, Snapshot, Status, Timestamp, TypeVersion};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Who is writing, and against which version.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteArgs {
    #[serde(rename = "userID", default)]
    pub user_id: String,
    #[serde(rename = "impersonatorID", default, skip_serializing_if = "Option::is_none")]
    pub impersonator_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_from: Option<Timestamp>,
    /// The `validFrom` of the version the caller last saw.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl WriteArgs {
    pub fn by(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Default::default()
        }
    }

    pub fn valid_from(mut self, valid_from: Timestamp) -> Self {
        self.valid_from = Some(valid_from);
        self
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn impersonator(mut self, impersonator_id: impl Into<String>) -> Self {
        self.impersonator_id = Some(impersonator_id.into());
        self
    }
}

/// Operations understood by the actors.
///
/// Entity operations come first, tree operations after. Sending one kind to
/// the other actor is a validation error.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    Create {
        value: Option<Value>,
        #[serde(flatten)]
        write: WriteArgs,
    },
    Replace {
        value: Option<Value>,
        #[serde(flatten)]
        write: WriteArgs,
    },
    Patch {
        delta: Delta,
        #[serde(flatten)]
        write: WriteArgs,
    },
    Delete {
        #[serde(flatten)]
        write: WriteArgs,
    },
    Undelete {
        #[serde(flatten)]
        write: WriteArgs,
    },
    Get {
        #[serde(default)]
        if_modified_since: Option<Timestamp>,
    },
    GetMeta {
        #[serde(default)]
        if_modified_since: Option<Timestamp>,
    },
    GetAsOf {
        valid_time: Timestamp,
    },
    /// Wipe all storage. Administrative.
    HardDelete,

    TreeCreate {
        value: Option<Value>,
        #[serde(flatten)]
        write: WriteArgs,
    },
    AddNode {
        value: Option<Value>,
        parent: NodeKey,
        #[serde(flatten)]
        write: WriteArgs,
    },
    AddBranch {
        parent: NodeKey,
        child: NodeKey,
        #[serde(flatten)]
        write: WriteArgs,
    },
    DeleteBranch {
        parent: NodeKey,
        child: NodeKey,
        #[serde(flatten)]
        write: WriteArgs,
    },
    MoveBranch {
        child: NodeKey,
        current_parent: NodeKey,
        new_parent: NodeKey,
        #[serde(flatten)]
        write: WriteArgs,
    },
    GetTree {
        #[serde(default)]
        if_modified_since: Option<Timestamp>,
    },
    GetNode {
        node: NodeKey,
    },
    PatchNode {
        node: NodeKey,
        delta: Delta,
        #[serde(flatten)]
        write: WriteArgs,
    },
    DeleteNode {
        node: NodeKey,
        #[serde(flatten)]
        write: WriteArgs,
    },
    UndeleteNode {
        node: NodeKey,
        #[serde(flatten)]
        write: WriteArgs,
    },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Create { .. } => "create",
            Operation::Replace { .. } => "replace",
            Operation::Patch { .. } => "patch",
            Operation::Delete { .. } => "delete",
            Operation::Undelete { .. } => "undelete",
            Operation::Get { .. } => "get",
            Operation::GetMeta { .. } => "get_meta",
            Operation::GetAsOf { .. } => "get_as_of",
            Operation::HardDelete => "hard_delete",
            Operation::TreeCreate { .. } => "tree_create",
            Operation::AddNode { .. } => "add_node",
            Operation::AddBranch { .. } => "add_branch",
            Operation::DeleteBranch { .. } => "delete_branch",
            Operation::MoveBranch { .. } => "move_branch",
            Operation::GetTree { .. } => "get_tree",
            Operation::GetNode { .. } => "get_node",
            Operation::PatchNode { .. } => "patch_node",
            Operation::DeleteNode { .. } => "delete_node",
            Operation::UndeleteNode { .. } => "undelete_node",
        }
    }
}

/// A request addressed to one actor.
///
/// `target` is only needed while the actor has no stored data; after that
/// the actor remembers its own type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<TypeVersion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    pub operation: Operation,
}

impl Request {
    pub fn new(operation: Operation) -> Self {
        Self {
            target: None,
            environment: None,
            operation,
        }
    }

    pub fn with_type(mut self, target: TypeVersion) -> Self {
        self.target = Some(target);
        self
    }

    pub fn in_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    pub fn create(value: Value, write: WriteArgs) -> Self {
        Self::new(Operation::Create {
            value: Some(value),
            write,
        })
    }

    pub fn replace(value: Value, write: WriteArgs) -> Self {
        Self::new(Operation::Replace {
            value: Some(value),
            write,
        })
    }

    pub fn patch(delta: Delta, write: WriteArgs) -> Self {
        Self::new(Operation::Patch { delta, write })
    }

    pub fn delete(write: WriteArgs) -> Self {
        Self::new(Operation::Delete { write })
    }

    pub fn undelete(write: WriteArgs) -> Self {
        Self::new(Operation::Undelete { write })
    }

    pub fn get(if_modified_since: Option<Timestamp>) -> Self {
        Self::new(Operation::Get { if_modified_since })
    }

    pub fn get_meta(if_modified_since: Option<Timestamp>) -> Self {
        Self::new(Operation::GetMeta { if_modified_since })
    }

    pub fn get_as_of(valid_time: Timestamp) -> Self {
        Self::new(Operation::GetAsOf { valid_time })
    }

    pub fn hard_delete() -> Self {
        Self::new(Operation::HardDelete)
    }

    pub fn tree_create(value: Value, write: WriteArgs) -> Self {
        Self::new(Operation::TreeCreate {
            value: Some(value),
            write,
        })
    }

    pub fn add_node(parent: impl Into<NodeKey>, value: Value, write: WriteArgs) -> Self {
        Self::new(Operation::AddNode {
            value: Some(value),
            parent: parent.into(),
            write,
        })
    }

    pub fn add_branch(parent: impl Into<NodeKey>, child: impl Into<NodeKey>, write: WriteArgs) -> Self {
        Self::new(Operation::AddBranch {
            parent: parent.into(),
            child: child.into(),
            write,
        })
    }

    pub fn delete_branch(
        parent: impl Into<NodeKey>,
        child: impl Into<NodeKey>,
        write: WriteArgs,
    ) -> Self {
        Self::new(Operation::DeleteBranch {
            parent: parent.into(),
            child: child.into(),
            write,
        })
    }

    pub fn move_branch(
        child: impl Into<NodeKey>,
        current_parent: impl Into<NodeKey>,
        new_parent: impl Into<NodeKey>,
        write: WriteArgs,
    ) -> Self {
        Self::new(Operation::MoveBranch {
            child: child.into(),
            current_parent: current_parent.into(),
            new_parent: new_parent.into(),
            write,
        })
    }

    pub fn get_tree(if_modified_since: Option<Timestamp>) -> Self {
        Self::new(Operation::GetTree { if_modified_since })
    }

    pub fn get_node(node: impl Into<NodeKey>) -> Self {
        Self::new(Operation::GetNode { node: node.into() })
    }

    pub fn patch_node(node: impl Into<NodeKey>, delta: Delta, write: WriteArgs) -> Self {
        Self::new(Operation::PatchNode {
            node: node.into(),
            delta,
            write,
        })
    }

    pub fn delete_node(node: impl Into<NodeKey>, write: WriteArgs) -> Self {
        Self::new(Operation::DeleteNode {
            node: node.into(),
            write,
        })
    }

    pub fn undelete_node(node: impl Into<NodeKey>, write: WriteArgs) -> Self {
        Self::new(Operation::UndeleteNode {
            node: node.into(),
            write,
        })
    }
}

/// Response payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Body {
    Empty,
    Snapshot(Snapshot),
    Meta(EntityMeta),
    /// A tree's meta plus its derived shape in `$id`/`$ref` form.
    Tree {
        meta: EntityMeta,
        tree: Value,
    },
    /// A tree node together with its entity's snapshot.
    Node {
        key: NodeKey,
        snapshot: Snapshot,
    },
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        retryable: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        current: Option<Box<Snapshot>>,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: Status,
    pub body: Body,
    /// Concurrency token for the next write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl Response {
    pub fn new(status: Status, body: Body, token: Option<String>) -> Self {
        Self {
            status,
            body,
            token,
        }
    }

    pub fn ok(body: Body, token: Option<String>) -> Self {
        Self::new(Status::Ok, body, token)
    }

    pub fn created(body: Body, token: Option<String>) -> Self {
        Self::new(Status::Created, body, token)
    }

    pub fn not_modified(token: Option<String>) -> Self {
        Self::new(Status::NotModified, Body::Empty, token)
    }

    pub fn from_error(err: &Error) -> Self {
        let current = err.current_snapshot().cloned();
        let token = current.as_ref().map(Snapshot::concurrency_token);
        Self::new(
            err.status(),
            Body::Error {
                message: err.to_string(),
                retryable: err.is_retryable(),
                current: current.map(Box::new),
            },
            token,
        )
    }

    pub fn snapshot(&self) -> Option<&Snapshot> {
        match &self.body {
            Body::Snapshot(snapshot) | Body::Node { snapshot, .. } => Some(snapshot),
            Body::Error { current, .. } => current.as_deref(),
            _ => None,
        }
    }

    pub fn into_snapshot(self) -> Option<Snapshot> {
        match self.body {
            Body::Snapshot(snapshot) | Body::Node { snapshot, .. } => Some(snapshot),
            Body::Error { current, .. } => current.map(|c| *c),
            _ => None,
        }
    }

    pub fn meta(&self) -> Option<&EntityMeta> {
        match &self.body {
            Body::Meta(meta) | Body::Tree { meta, .. } => Some(meta),
            _ => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.body {
            Body::Error { message, .. } => Some(message),
            _ => None,
        }
    }

    /// Rebuild the error a response reports.
    ///
    /// Used when a delegated call came back with a status other than the
    /// one expected. Responses that are not errors become state conflicts.
    pub fn into_error(self) -> Error {
        let status = self.status;
        let (message, retryable, current) = match self.body {
            Body::Error {
                message,
                retryable,
                current,
            } => (message, retryable, current),
            _ => (format!("unexpected status {}", status), false, None),
        };
        match (status, current) {
            (Status::ValidationError, _) => Error::Validation(message),
            (Status::NotFound, _) => Error::NotFound(message),
            (Status::PreconditionRequired, Some(current)) => {
                Error::PreconditionRequired { message, current }
            }
            (Status::PreconditionFailed, Some(current)) => Error::PreconditionFailed {
                token: current.concurrency_token(),
                current,
            },
            (Status::InternalError, _) => Error::Storage(message),
            (Status::Conflict, _) if retryable => Error::TransientConflict(message),
            _ => Error::StateConflict(message),
        }
    }
}
