#[derive(Clone, Debug)]
/// Dispatched payload carried across the viewer SSE channel.
pub struct ServerEvent {
    /// Optional SSE event name.
    pub event: Option<String>,
    /// Pre-serialized JSON data field.
    pub data: String,
}

impl ServerEvent {
    /// Build an event with a raw string payload.
    pub fn new(event: Option<String>, data: String) -> Self {
        Self { event, data }
    }
}
