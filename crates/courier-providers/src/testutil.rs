//! Message builders shared by adapter unit tests.

use std::collections::HashMap;

use chrono::Utc;
use courier_core::{Channel, Message, MessageId, MessageStatus, TenantId};

/// A minimal pending message for the given channel.
pub fn message(channel: Channel, to: &str, body: &str) -> Message {
    Message {
        id: MessageId::new(),
        tenant_id: TenantId::new(),
        campaign_id: None,
        channel,
        from: match channel {
            Channel::Sms | Channel::Whatsapp => "+15550001111".to_string(),
            Channel::Telegram => "courier_bot".to_string(),
            Channel::Messenger => "1234567890".to_string(),
        },
        to: to.to_string(),
        body: body.to_string(),
        media_url: None,
        media_type: None,
        template_id: None,
        template_params: HashMap::new(),
        provider_template: None,
        priority: 5,
        scheduled_for: None,
        status: MessageStatus::Pending,
        provider_name: None,
        provider_message_id: None,
        cost: 0.0,
        currency: String::new(),
        error: None,
        metadata: HashMap::new(),
        created_at: Utc::now(),
        sent_at: None,
        delivered_at: None,
        read_at: None,
        retry_count: 0,
        max_retries: 3,
    }
}

/// A pending SMS message.
pub fn sms_message(to: &str, body: &str) -> Message {
    message(Channel::Sms, to, body)
}
