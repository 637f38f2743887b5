mod identity;
mod interceptor;
mod registry;
mod store;
mod token;
mod transport;

pub use identity::{Claim, ClaimsIdentity};
pub use interceptor::{InterceptOutcome, RelaySettings, TokenExchangeInterceptor};
pub use registry::{SkillDescriptor, SkillRegistry};
pub use store::{ConversationStore, InMemoryConversationStore, RelayRecord};
pub use token::{HttpTokenExchanger, TokenExchangeOutcome, TokenExchanger};
pub use transport::{HttpSkillTransport, SkillTransport};
