use crate::WireError;

/// The application-state key ring movement travels under.
pub const MOVE_STATE_KEY: &str = "MOVE";

/// Field delimiter inside a MOVE value. Must not occur inside tokens.
pub const STATE_DELIMITER: char = ',';

const BOOT: &str = "BOOT";
const NORMAL: &str = "NORMAL";
const LEAVING: &str = "LEAVING";
const LEFT: &str = "LEFT";
const HIBERNATE: &str = "hibernate";
const REMOVE: &str = "remove";

/// A parsed MOVE application-state value: `state,token[,extra,token]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveValue {
    Bootstrapping { token: String },
    Normal { token: String, remove: Option<String> },
    Leaving { token: String },
    Left { token: String },
    Hibernate,
}

impl MoveValue {
    pub fn encode(&self) -> String {
        let out = match self {
            MoveValue::Bootstrapping { token } => format!("{BOOT}{STATE_DELIMITER}{token}"),
            MoveValue::Normal {
                token,
                remove: None,
            } => format!("{NORMAL}{STATE_DELIMITER}{token}"),
            MoveValue::Normal {
                token,
                remove: Some(removed),
            } => format!(
                "{NORMAL}{STATE_DELIMITER}{token}{STATE_DELIMITER}{REMOVE}{STATE_DELIMITER}{removed}"
            ),
            MoveValue::Leaving { token } => format!("{LEAVING}{STATE_DELIMITER}{token}"),
            MoveValue::Left { token } => format!("{LEFT}{STATE_DELIMITER}{token}"),
            MoveValue::Hibernate => HIBERNATE.to_string(),
        };
        debug_assert_eq!(self.tokens().iter().filter(|t| t.contains(STATE_DELIMITER)).count(), 0);
        out
    }

    pub fn decode(value: &str) -> Result<MoveValue, WireError> {
        let mut fields = value.split(STATE_DELIMITER);
        let state = fields.next().unwrap_or_default();
        let token = |field: Option<&str>| -> Result<String, WireError> {
            field
                .map(str::to_string)
                .ok_or_else(|| WireError::BadGossipState(value.to_string()))
        };

        match state {
            BOOT => Ok(MoveValue::Bootstrapping {
                token: token(fields.next())?,
            }),
            NORMAL => {
                let own = token(fields.next())?;
                let remove = match fields.next() {
                    None => None,
                    Some(REMOVE) => Some(token(fields.next())?),
                    Some(_) => return Err(WireError::BadGossipState(value.to_string())),
                };
                Ok(MoveValue::Normal { token: own, remove })
            }
            LEAVING => Ok(MoveValue::Leaving {
                token: token(fields.next())?,
            }),
            LEFT => Ok(MoveValue::Left {
                token: token(fields.next())?,
            }),
            HIBERNATE => Ok(MoveValue::Hibernate),
            _ => Err(WireError::BadGossipState(value.to_string())),
        }
    }

    fn tokens(&self) -> Vec<&str> {
        match self {
            MoveValue::Bootstrapping { token }
            | MoveValue::Leaving { token }
            | MoveValue::Left { token } => vec![token],
            MoveValue::Normal { token, remove } => {
                let mut out = vec![token.as_str()];
                out.extend(remove.as_deref());
                out
            }
            MoveValue::Hibernate => Vec::new(),
        }
    }
}
