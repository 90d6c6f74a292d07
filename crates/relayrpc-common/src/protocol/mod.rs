pub mod address;
pub mod call;
pub mod error;
pub mod frame;
pub mod reply;


pub use address::NodeAddress;
pub use call::{generate_request_id, Attachments, Call, Param, RequestId};
pub use error::{Result, RpcError};
pub use frame::{Frame, Message, MessageType, HEADER_LEN, MAGIC, MAX_BODY_SIZE, VERSION};
pub use reply::{Reply, STATUS_FAILURE, STATUS_OK};
