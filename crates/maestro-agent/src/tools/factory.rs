//! Builds capability handlers from the tool records attached to an
//! assistant. A record that cannot be built is skipped with a warning —
//! the assistant still comes up with the tools that did initialize.

use std::sync::{Arc, Weak};

use tracing::{info, warn};
use uuid::Uuid;

use maestro_rest::models::{ToolDefinitionRecord, ToolKind};
use maestro_rest::{DataPlane, RagService};

use super::calendar::{CalendarAction, CalendarTool};
use super::memory::{MemorySaveTool, MemorySearchTool};
use super::reminders::{ReminderCreateTool, ReminderDeleteTool, ReminderListTool};
use super::sub_assistant::SubAssistantTool;
use super::time::TimeTool;
use super::web_search::WebSearchTool;
use super::Tool;
use crate::factory::AgentFactory;

pub struct ToolFactory {
    data_plane: Arc<dyn DataPlane>,
    rag: Arc<dyn RagService>,
    tavily_api_key: Option<String>,
    calendar_base_url: String,
}

impl ToolFactory {
    pub fn new(
        data_plane: Arc<dyn DataPlane>,
        rag: Arc<dyn RagService>,
        tavily_api_key: Option<String>,
        calendar_base_url: String,
    ) -> Self {
        Self {
            data_plane,
            rag,
            tavily_api_key,
            calendar_base_url,
        }
    }

    /// Instantiate handlers for every active tool record. `agent_factory`
    /// is only captured (weakly) by sub-assistant tools.
    pub fn build(
        &self,
        records: &[ToolDefinitionRecord],
        user_id: i64,
        assistant_id: Uuid,
        agent_factory: &Weak<AgentFactory>,
    ) -> Vec<Arc<dyn Tool>> {
        let mut tools: Vec<Arc<dyn Tool>> = Vec::with_capacity(records.len());

        for record in records.iter().filter(|r| r.is_active) {
            match self.build_one(record, user_id, assistant_id, agent_factory) {
                Some(tool) => tools.push(tool),
                None => {
                    warn!(
                        tool = %record.name,
                        tool_type = ?record.tool_type,
                        assistant_id = %assistant_id,
                        user_id,
                        "tool skipped during initialization"
                    );
                }
            }
        }

        if tools.len() == records.len() {
            info!(count = tools.len(), %assistant_id, user_id, "all defined tools initialized");
        }
        tools
    }

    fn build_one(
        &self,
        record: &ToolDefinitionRecord,
        user_id: i64,
        assistant_id: Uuid,
        agent_factory: &Weak<AgentFactory>,
    ) -> Option<Arc<dyn Tool>> {
        let name = record.name.clone();
        let description = record.description.clone();

        let tool: Arc<dyn Tool> = match record.tool_type {
            ToolKind::Time => Arc::new(TimeTool::new(name, description)),
            ToolKind::ReminderCreate => Arc::new(ReminderCreateTool {
                name,
                description,
                user_id,
                assistant_id,
                data_plane: Arc::clone(&self.data_plane),
            }),
            ToolKind::ReminderList => Arc::new(ReminderListTool {
                name,
                description,
                user_id,
                data_plane: Arc::clone(&self.data_plane),
            }),
            ToolKind::ReminderDelete => Arc::new(ReminderDeleteTool {
                name,
                description,
                user_id,
                data_plane: Arc::clone(&self.data_plane),
            }),
            ToolKind::Calendar => {
                // One DB record covers both directions; the record name
                // picks the action.
                let action = if record.name.contains("create") {
                    CalendarAction::Create
                } else {
                    CalendarAction::List
                };
                Arc::new(CalendarTool::new(
                    name,
                    description,
                    user_id,
                    action,
                    self.calendar_base_url.clone(),
                ))
            }
            ToolKind::WebSearch => {
                let api_key = match &self.tavily_api_key {
                    Some(key) => key.clone(),
                    None => {
                        warn!("web search tool requires TAVILY_API_KEY");
                        return None;
                    }
                };
                Arc::new(WebSearchTool::new(name, description, api_key))
            }
            ToolKind::MemorySave => Arc::new(MemorySaveTool {
                name,
                description,
                user_id,
                assistant_id,
                rag: Arc::clone(&self.rag),
            }),
            ToolKind::MemorySearch => Arc::new(MemorySearchTool {
                name,
                description,
                user_id,
                rag: Arc::clone(&self.rag),
            }),
            ToolKind::SubAssistant => {
                let sub_assistant_id = record.sub_assistant_id?;
                if sub_assistant_id == assistant_id {
                    warn!(
                        %assistant_id,
                        "sub_assistant tool points at its own parent, refusing"
                    );
                    return None;
                }
                Arc::new(SubAssistantTool {
                    name,
                    description,
                    user_id,
                    parent_assistant_id: assistant_id,
                    sub_assistant_id,
                    factory: agent_factory.clone(),
                })
            }
        };
        Some(tool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use maestro_rest::testing::{InMemoryDataPlane, InMemoryRag};

    fn record(name: &str, kind: ToolKind) -> ToolDefinitionRecord {
        ToolDefinitionRecord {
            id: Uuid::new_v4(),
            name: name.to_string(),
            tool_type: kind,
            description: format!("{name} tool"),
            input_schema: None,
            sub_assistant_id: None,
            is_active: true,
        }
    }

    fn tool_factory(tavily: Option<&str>) -> ToolFactory {
        ToolFactory::new(
            Arc::new(InMemoryDataPlane::new()),
            Arc::new(InMemoryRag::new()),
            tavily.map(String::from),
            "http://calendar-service:8000".to_string(),
        )
    }

    #[test]
    fn builds_every_supported_kind() {
        let factory = tool_factory(Some("tvly-key"));
        let parent = Uuid::new_v4();
        let mut records = vec![
            record("current_time", ToolKind::Time),
            record("reminder_create", ToolKind::ReminderCreate),
            record("reminder_list", ToolKind::ReminderList),
            record("reminder_delete", ToolKind::ReminderDelete),
            record("calendar_create_event", ToolKind::Calendar),
            record("web_search", ToolKind::WebSearch),
            record("memory_save", ToolKind::MemorySave),
            record("memory_search", ToolKind::MemorySearch),
        ];
        let mut sub = record("research", ToolKind::SubAssistant);
        sub.sub_assistant_id = Some(Uuid::new_v4());
        records.push(sub);

        let tools = factory.build(&records, 42, parent, &Weak::new());
        assert_eq!(tools.len(), records.len());
        let names: Vec<&str> = tools.iter().map(|t| t.name()).collect();
        assert!(names.contains(&"web_search"));
        assert!(names.contains(&"research"));
    }

    #[test]
    fn inactive_records_are_skipped() {
        let factory = tool_factory(None);
        let mut inactive = record("current_time", ToolKind::Time);
        inactive.is_active = false;
        let tools = factory.build(&[inactive], 42, Uuid::new_v4(), &Weak::new());
        assert!(tools.is_empty());
    }

    #[test]
    fn web_search_requires_an_api_key() {
        let factory = tool_factory(None);
        let tools = factory.build(
            &[record("web_search", ToolKind::WebSearch)],
            42,
            Uuid::new_v4(),
            &Weak::new(),
        );
        assert!(tools.is_empty());
    }

    #[test]
    fn self_referential_sub_assistant_is_refused() {
        let factory = tool_factory(None);
        let parent = Uuid::new_v4();
        let mut sub = record("research", ToolKind::SubAssistant);
        sub.sub_assistant_id = Some(parent);
        let tools = factory.build(&[sub], 42, parent, &Weak::new());
        assert!(tools.is_empty());

        // And one with no target at all.
        let dangling = record("research", ToolKind::SubAssistant);
        let tools = factory.build(&[dangling], 42, parent, &Weak::new());
        assert!(tools.is_empty());
    }
}
