use super::common::Status;

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BroadcastResponse {
    #[prost(enumeration = "Status", tag = "1")]
    pub status: i32,
    #[prost(string, tag = "2")]
    pub info: String,
}

impl BroadcastResponse {
    pub fn is_success(&self) -> bool {
        self.status == Status::Success as i32
    }
}
