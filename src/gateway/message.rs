use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Inbound webhook envelope. Only the fields the bridge dispatches on are
/// decoded; event payloads with extra elements still parse.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InboundMessage {
    pub to_user_name: String,
    pub from_user_name: String,
    #[serde(default)]
    pub create_time: i64,
    pub msg_type: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub msg_id: Option<String>,
}

pub fn decode(body: &str) -> Result<InboundMessage> {
    quick_xml::de::from_str(body).context("failed to decode inbound xml envelope")
}

/// Splits `]]>` so user text can never terminate the CDATA section early.
fn cdata(content: &str) -> String {
    format!("<![CDATA[{}]]>", content.replace("]]>", "]]]]><![CDATA[>"))
}

/// Passive text reply: recipient and sender swapped from the inbound event,
/// generation timestamp in unix milliseconds.
pub fn render_text_reply(inbound: &InboundMessage, content: &str, now: DateTime<Utc>) -> String {
    format!(
        "<xml><ToUserName>{}</ToUserName><FromUserName>{}</FromUserName><CreateTime>{}</CreateTime><MsgType><![CDATA[text]]></MsgType><Content>{}</Content></xml>",
        cdata(&inbound.from_user_name),
        cdata(&inbound.to_user_name),
        now.timestamp_millis(),
        cdata(content),
    )
}
