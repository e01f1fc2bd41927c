//! Bot registry: bot type to capability descriptor

use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use super::{AccumulatorBot, Bot, BotDescriptor, Typed, VolumeBot};
use crate::models::BotType;

/// Populated at startup, read-only afterwards
#[derive(Default, Clone)]
pub struct BotRegistry {
    bots: HashMap<BotType, Arc<dyn BotDescriptor>>,
}

impl BotRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in bot
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register_bot(VolumeBot);
        registry.register_bot(AccumulatorBot);
        registry
    }

    /// Stores the descriptor for `bot_type`, replacing any previous one
    pub fn register(&mut self, bot_type: BotType, descriptor: Arc<dyn BotDescriptor>) {
        if self.bots.insert(bot_type, descriptor).is_some() {
            info!("Replaced bot descriptor for {}", bot_type);
        } else {
            info!("Registered bot {}", bot_type);
        }
    }

    pub fn register_bot<B: Bot>(&mut self, bot: B) {
        let bot_type = bot.bot_type();
        self.register(bot_type, Arc::new(Typed(bot)));
    }

    pub fn get(&self, bot_type: BotType) -> Option<Arc<dyn BotDescriptor>> {
        self.bots.get(&bot_type).cloned()
    }

    pub fn bot_types(&self) -> Vec<BotType> {
        self.bots.keys().copied().collect()
    }
}
