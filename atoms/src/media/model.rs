/// An image picked or dropped by the user, held only until submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingImage {
    pub file_name: String,
    // Reported by the picker, advisory only
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl PendingImage {
    pub fn new(file_name: &str, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.to_string(),
            content_type: None,
            bytes,
        }
    }
}
