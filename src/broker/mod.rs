//! Broker topology manager (C3) and the thin publish helper the stage
//! worker runtime uses after committing a transaction.

pub mod topology;

use lapin::options::BasicPublishOptions;
use lapin::types::{AMQPValue, FieldTable, ShortString};
use lapin::{BasicProperties, Channel};

use crate::envelope::Envelope;
use crate::error::BrokerError;
pub use topology::Topology;

/// Publish `message` to `exchange`/`routing_key`, persistent delivery mode,
/// `content-type: application/json`, with `request_id` and the producing
/// component stamped into headers, matching spec §4.5 step 5 and §6.
pub async fn publish(
    channel: &Channel,
    exchange: &str,
    routing_key: &str,
    message: &Envelope,
    producing_component: &str,
) -> Result<(), BrokerError> {
    let body = serde_json::to_vec(message)?;

    let mut headers = FieldTable::default();
    headers.insert(
        ShortString::from("request_id"),
        AMQPValue::LongString(message.request_id.as_ref().to_string().into()),
    );
    headers.insert(
        ShortString::from("producing_component"),
        AMQPValue::LongString(producing_component.into()),
    );

    let properties = BasicProperties::default()
        .with_content_type(ShortString::from("application/json"))
        .with_delivery_mode(2) // persistent
        .with_message_id(ShortString::from(Envelope::new_message_id()))
        .with_headers(headers);

    channel
        .basic_publish(
            exchange,
            routing_key,
            BasicPublishOptions::default(),
            &body,
            properties,
        )
        .await?
        .await?;

    Ok(())
}
