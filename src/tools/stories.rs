//! In-memory user stories.
//!
//! Stories live for the lifetime of the process.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::{RegistryError, ToolError};
use crate::mcp::registry::{Tool, ToolContext, ToolHandler, ToolRegistry};

/// Story priority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Can wait.
    Low,
    /// Normal priority.
    #[default]
    Medium,
    /// Next in line.
    High,
}

/// Story workflow status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Newly created, not yet refined.
    #[default]
    Draft,
    /// Refined and ready for work.
    Ready,
    /// Accepted.
    Done,
}

/// A stored user story.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserStory {
    /// Server-assigned UUID.
    pub id: String,
    /// Short title.
    pub title: String,
    /// The story text.
    pub description: String,
    /// Conditions for acceptance, in the order given.
    pub acceptance_criteria: Vec<String>,
    /// Priority.
    pub priority: Priority,
    /// Workflow status.
    pub status: Status,
    /// Creation time, RFC 3339 in UTC.
    pub created_at: String,
}

/// Listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorySummary {
    /// Story ID.
    pub id: String,
    /// Story title.
    pub title: String,
    /// Workflow status.
    pub status: Status,
    /// Priority.
    pub priority: Priority,
}

impl From<&UserStory> for StorySummary {
    fn from(story: &UserStory) -> Self {
        Self {
            id: story.id.clone(),
            title: story.title.clone(),
            status: story.status,
            priority: story.priority,
        }
    }
}

/// Fields accepted by `create_user_story`.
#[derive(Debug, Clone, Deserialize)]
pub struct NewStory {
    /// Short title.
    pub title: String,
    /// The story text.
    pub description: String,
    /// Conditions for acceptance (empty if omitted).
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    /// Priority (`medium` if omitted).
    #[serde(default)]
    pub priority: Priority,
}

/// Thread-safe story store.
#[derive(Debug, Default)]
pub struct StoryStore {
    stories: Mutex<Vec<UserStory>>,
}

impl StoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a new draft story and returns it.
    #[must_use]
    pub fn create(&self, new: NewStory) -> UserStory {
        let story = UserStory {
            id: Uuid::new_v4().to_string(),
            title: new.title,
            description: new.description,
            acceptance_criteria: new.acceptance_criteria,
            priority: new.priority,
            status: Status::Draft,
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        };
        self.lock().push(story.clone());
        story
    }

    /// Stories in creation order, optionally filtered by status.
    #[must_use]
    pub fn list(&self, status: Option<Status>) -> Vec<StorySummary> {
        self.lock()
            .iter()
            .filter(|story| status.map_or(true, |s| story.status == s))
            .map(StorySummary::from)
            .collect()
    }

    /// Looks up a story by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<UserStory> {
        self.lock().iter().find(|story| story.id == id).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<UserStory>> {
        self.stories.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn parse<T: for<'de> Deserialize<'de>>(params: Value) -> Result<T, ToolError> {
    serde_json::from_value(params).map_err(|e| ToolError::new(format!("invalid arguments: {e}")))
}

fn to_result<T: Serialize>(value: &T) -> Result<Value, ToolError> {
    serde_json::to_value(value).map_err(|e| ToolError::new(e.to_string()))
}

struct CreateStory(Arc<StoryStore>);

#[async_trait]
impl ToolHandler for CreateStory {
    async fn invoke(&self, params: Value, _ctx: ToolContext) -> Result<Value, ToolError> {
        let story = self.0.create(parse(params)?);
        tracing::info!(story = %story.id, "created user story");
        Ok(json!({ "story": to_result(&story)? }))
    }
}

#[derive(Deserialize)]
struct ListParams {
    #[serde(default)]
    status: Option<Status>,
}

struct ListStories(Arc<StoryStore>);

#[async_trait]
impl ToolHandler for ListStories {
    async fn invoke(&self, params: Value, _ctx: ToolContext) -> Result<Value, ToolError> {
        let params: ListParams = if params.is_null() {
            ListParams { status: None }
        } else {
            parse(params)?
        };
        to_result(&self.0.list(params.status))
    }
}

#[derive(Deserialize)]
struct GetParams {
    id: String,
}

struct GetStory(Arc<StoryStore>);

#[async_trait]
impl ToolHandler for GetStory {
    async fn invoke(&self, params: Value, _ctx: ToolContext) -> Result<Value, ToolError> {
        let GetParams { id } = parse(params)?;
        let story = self
            .0
            .get(&id)
            .ok_or_else(|| ToolError::new(format!("user story '{id}' not found")))?;
        Ok(json!({ "story": to_result(&story)? }))
    }
}

/// Registers `create_user_story`, `list_user_stories` and `get_user_story`.
///
/// # Errors
///
/// Returns [`RegistryError::DuplicateTool`] if any of the names is taken.
pub fn register_story_tools(
    registry: &mut ToolRegistry,
    store: Arc<StoryStore>,
) -> Result<(), RegistryError> {
    registry.register(Tool::new(
        "create_user_story",
        "Create a user story",
        json!({
            "type": "object",
            "properties": {
                "title": { "type": "string", "description": "Short story title" },
                "description": { "type": "string", "description": "The story text" },
                "acceptance_criteria": {
                    "type": "array",
                    "items": { "type": "string" }
                },
                "priority": { "type": "string", "enum": ["low", "medium", "high"] }
            },
            "required": ["title", "description"]
        }),
        CreateStory(Arc::clone(&store)),
    ))?;

    registry.register(Tool::new(
        "list_user_stories",
        "List user stories, optionally filtered by status",
        json!({
            "type": "object",
            "properties": {
                "status": { "type": "string", "enum": ["draft", "ready", "done"] }
            }
        }),
        ListStories(Arc::clone(&store)),
    ))?;

    registry.register(Tool::new(
        "get_user_story",
        "Fetch one user story by id",
        json!({
            "type": "object",
            "properties": {
                "id": { "type": "string" }
            },
            "required": ["id"]
        }),
        GetStory(store),
    ))?;

    Ok(())
}
