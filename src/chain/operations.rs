//! Chain operations the portal broadcasts
//!
//! Only two operation types are ever needed: `comment` for new posts and
//! `custom_json` carrying community protocol actions.

use serde::{Serialize, Serializer};
use serde_json::json;

use super::model::Role;

/// `custom_json` id of the community protocol
pub const COMMUNITY_OP_ID: &str = "community";

/// Operation type ids in the binary serialization
const COMMENT_OP_TAG: u32 = 1;
const CUSTOM_JSON_OP_TAG: u32 = 18;

/// Community protocol action
#[derive(Debug, Clone, PartialEq)]
pub enum CommunityAction {
    SetRole { account: String, role: Role },
    PinPost { account: String, permlink: String },
    UnpinPost { account: String, permlink: String },
}

impl CommunityAction {
    pub fn name(&self) -> &'static str {
        match self {
            CommunityAction::SetRole { .. } => "setRole",
            CommunityAction::PinPost { .. } => "pinPost",
            CommunityAction::UnpinPost { .. } => "unpinPost",
        }
    }

    /// `["<action>", {community, ...}]` as a JSON string
    pub fn to_json(&self, community: &str) -> String {
        let payload = match self {
            CommunityAction::SetRole { account, role } => json!({
                "community": community,
                "account": account,
                "role": role.as_str(),
            }),
            CommunityAction::PinPost { account, permlink }
            | CommunityAction::UnpinPost { account, permlink } => json!({
                "community": community,
                "account": account,
                "permlink": permlink,
            }),
        };
        json!([self.name(), payload]).to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommentOperation {
    pub parent_author: String,
    pub parent_permlink: String,
    pub author: String,
    pub permlink: String,
    pub title: String,
    pub body: String,
    pub json_metadata: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomJsonOperation {
    pub required_auths: Vec<String>,
    pub required_posting_auths: Vec<String>,
    pub id: String,
    pub json: String,
}

impl CustomJsonOperation {
    /// Community action authorised by the admin's posting key
    pub fn community(admin: &str, community: &str, action: &CommunityAction) -> Self {
        Self {
            required_auths: Vec::new(),
            required_posting_auths: vec![admin.to_string()],
            id: COMMUNITY_OP_ID.to_string(),
            json: action.to_json(community),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Comment(CommentOperation),
    CustomJson(CustomJsonOperation),
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Comment(_) => "comment",
            Operation::CustomJson(_) => "custom_json",
        }
    }

    /// Append the binary form: tag then fields in declaration order
    pub fn write_to(&self, out: &mut Vec<u8>) {
        match self {
            Operation::Comment(op) => {
                write_varint(out, COMMENT_OP_TAG);
                write_string(out, &op.parent_author);
                write_string(out, &op.parent_permlink);
                write_string(out, &op.author);
                write_string(out, &op.permlink);
                write_string(out, &op.title);
                write_string(out, &op.body);
                write_string(out, &op.json_metadata);
            }
            Operation::CustomJson(op) => {
                write_varint(out, CUSTOM_JSON_OP_TAG);
                write_string_set(out, &op.required_auths);
                write_string_set(out, &op.required_posting_auths);
                write_string(out, &op.id);
                write_string(out, &op.json);
            }
        }
    }
}

/// Condenser JSON form is `["<name>", {fields}]`
impl Serialize for Operation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Operation::Comment(op) => (self.name(), op).serialize(serializer),
            Operation::CustomJson(op) => (self.name(), op).serialize(serializer),
        }
    }
}

/// Unsigned LEB128
pub fn write_varint(out: &mut Vec<u8>, mut value: u32) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

pub fn write_string(out: &mut Vec<u8>, value: &str) {
    write_varint(out, value.len() as u32);
    out.extend_from_slice(value.as_bytes());
}

/// Account sets are serialized sorted, as the chain stores them
fn write_string_set(out: &mut Vec<u8>, values: &[String]) {
    let mut sorted: Vec<&String> = values.iter().collect();
    sorted.sort();
    sorted.dedup();
    write_varint(out, sorted.len() as u32);
    for value in sorted {
        write_string(out, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_role_json() {
        let action = CommunityAction::SetRole {
            account: "alice".into(),
            role: Role::Mod,
        };
        let value: serde_json::Value =
            serde_json::from_str(&action.to_json("hive-138395")).unwrap();
        assert_eq!(
            value,
            json!(["setRole", {"community": "hive-138395", "account": "alice", "role": "mod"}])
        );
    }

    #[test]
    fn test_pin_json() {
        let action = CommunityAction::PinPost {
            account: "bob".into(),
            permlink: "fare-update".into(),
        };
        let value: serde_json::Value = serde_json::from_str(&action.to_json("hive-1")).unwrap();
        assert_eq!(value[0], "pinPost");
        assert_eq!(value[1]["permlink"], "fare-update");
    }

    #[test]
    fn test_varint() {
        let mut out = Vec::new();
        write_varint(&mut out, 0);
        write_varint(&mut out, 127);
        write_varint(&mut out, 128);
        write_varint(&mut out, 300);
        assert_eq!(out, vec![0x00, 0x7f, 0x80, 0x01, 0xac, 0x02]);
    }

    #[test]
    fn test_custom_json_binary_layout() {
        let op = Operation::CustomJson(CustomJsonOperation {
            required_auths: vec![],
            required_posting_auths: vec!["ab".into()],
            id: "community".into(),
            json: "[]".into(),
        });
        let mut out = Vec::new();
        op.write_to(&mut out);

        let mut expected = vec![18, 0, 1, 2, b'a', b'b', 9];
        expected.extend_from_slice(b"community");
        expected.extend_from_slice(&[2, b'[', b']']);
        assert_eq!(out, expected);
    }

    #[test]
    fn test_operation_json_shape() {
        let op = Operation::CustomJson(CustomJsonOperation::community(
            "city-admin",
            "hive-138395",
            &CommunityAction::SetRole {
                account: "alice".into(),
                role: Role::Muted,
            },
        ));
        let value = serde_json::to_value(&op).unwrap();
        assert_eq!(value[0], "custom_json");
        assert_eq!(value[1]["id"], "community");
        assert_eq!(value[1]["required_posting_auths"], json!(["city-admin"]));
        assert_eq!(value[1]["required_auths"], json!([]));
    }
}
