//! Callback XML parsing.
//!
//! Builds a small element tree so that `<Quote>` children (which reuse names like
//! `MsgId` and `Content`) never collide with the top-level fields.

use quick_xml::events::Event;
use quick_xml::reader::Reader;
use tracing::debug;
use wecom_relay_core::{MsgType, QuotedMessage};

use crate::error::CallbackError;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct XmlNode {
    pub name: String,
    /// Concatenated text and CDATA directly under this element.
    pub text: String,
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    fn named(name: String) -> Self {
        Self {
            name,
            ..Default::default()
        }
    }

    /// First direct child with this name.
    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Trimmed text of a direct child; empty or absent maps to `None`.
    pub fn child_text(&self, name: &str) -> Option<String> {
        self.child(name)
            .map(|c| c.text.trim())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    }
}

fn attach(stack: &mut [XmlNode], root: &mut Option<XmlNode>, node: XmlNode, input: &str) -> Result<(), CallbackError> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None if root.is_none() => *root = Some(node),
        None => return Err(CallbackError::xml("multiple root elements", input)),
    }
    Ok(())
}

/// Parse a document into its root element.
pub fn parse_tree(xml: &str) -> Result<XmlNode, CallbackError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut stack: Vec<XmlNode> = Vec::new();
    let mut root: Option<XmlNode> = None;

    loop {
        let event = reader.read_event_into(&mut buf).map_err(|e| {
            CallbackError::xml(format!("xml parse failed: {}", e), xml)
        })?;
        match event {
            Event::Start(e) => {
                if stack.is_empty() && root.is_some() {
                    return Err(CallbackError::xml("multiple root elements", xml));
                }
                stack.push(XmlNode::named(String::from_utf8_lossy(e.name().as_ref()).into_owned()));
            }
            Event::Empty(e) => {
                let node = XmlNode::named(String::from_utf8_lossy(e.name().as_ref()).into_owned());
                attach(&mut stack, &mut root, node, xml)?;
            }
            Event::End(e) => {
                let end_name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                let node = stack
                    .pop()
                    .ok_or_else(|| CallbackError::xml(format!("unexpected </{}>", end_name), xml))?;
                if node.name != end_name {
                    return Err(CallbackError::xml(
                        format!("expected </{}>, found </{}>", node.name, end_name),
                        xml,
                    ));
                }
                attach(&mut stack, &mut root, node, xml)?;
            }
            Event::Text(e) => {
                let text = e
                    .unescape()
                    .map_err(|err| CallbackError::xml(format!("bad text escape: {}", err), xml))?;
                match stack.last_mut() {
                    Some(node) => node.text.push_str(&text),
                    None if text.trim().is_empty() => {}
                    None => return Err(CallbackError::xml("text outside root element", xml)),
                }
            }
            Event::CData(e) => match stack.last_mut() {
                Some(node) => node.text.push_str(&String::from_utf8_lossy(e.as_ref())),
                None => return Err(CallbackError::xml("CDATA outside root element", xml)),
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if let Some(open) = stack.last() {
        return Err(CallbackError::xml(format!("unclosed <{}>", open.name), xml));
    }
    root.ok_or_else(|| CallbackError::xml("empty document", xml))
}

/// Callback message fields as they appear in the decrypted XML, before
/// normalisation into a stored record.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedMessage {
    pub to_user: Option<String>,
    pub from_user: String,
    pub msg_type: MsgType,
    pub create_time: Option<i64>,
    pub msg_id: Option<String>,
    pub agent_id: Option<i64>,

    pub content: Option<String>,
    pub pic_url: Option<String>,
    pub media_id: Option<String>,
    pub format: Option<String>,
    pub recognition: Option<String>,
    pub thumb_media_id: Option<String>,
    pub location_x: Option<f64>,
    pub location_y: Option<f64>,
    pub scale: Option<i64>,
    pub label: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<i64>,
    pub event: Option<String>,
    pub event_key: Option<String>,
    pub app_type: Option<String>,

    pub quote: Option<QuotedMessage>,
}

fn optional_number<T: std::str::FromStr>(node: &XmlNode, name: &str) -> Option<T> {
    let raw = node.child_text(name)?;
    match raw.parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            debug!(field = name, value = %raw, "Ignoring non-numeric callback field");
            None
        }
    }
}

fn parse_quote(node: &XmlNode) -> QuotedMessage {
    QuotedMessage {
        quoted_msg_id: node.child_text("MsgId"),
        quoted_content: node.child_text("Content"),
        quoted_from_user: node.child_text("FromUserName"),
        quoted_from_user_name: None,
        quoted_msg_type: node.child_text("MsgType"),
    }
}

/// Parse a decrypted callback body.
///
/// `FromUserName` and a known `MsgType` are required; `CreateTime`, when present,
/// must be numeric. Other numeric fields that fail to parse are dropped.
pub fn parse_message(xml: &str) -> Result<ParsedMessage, CallbackError> {
    let root = parse_tree(xml)?;

    let msg_type_raw = root
        .child_text("MsgType")
        .ok_or_else(|| CallbackError::xml("missing MsgType", xml))?;
    let msg_type = msg_type_raw
        .to_ascii_lowercase()
        .parse::<MsgType>()
        .map_err(|_| CallbackError::xml(format!("unsupported MsgType '{}'", msg_type_raw), xml))?;
    let from_user = root
        .child_text("FromUserName")
        .ok_or_else(|| CallbackError::xml("missing FromUserName", xml))?;

    let create_time = match root.child_text("CreateTime") {
        Some(raw) => Some(raw.parse::<i64>().map_err(|_| {
            CallbackError::xml(format!("CreateTime is not numeric: '{}'", raw), xml)
        })?),
        None => None,
    };

    Ok(ParsedMessage {
        to_user: root.child_text("ToUserName"),
        from_user,
        msg_type,
        create_time,
        msg_id: root.child_text("MsgId"),
        agent_id: optional_number(&root, "AgentID"),
        content: root.child_text("Content"),
        pic_url: root.child_text("PicUrl"),
        media_id: root.child_text("MediaId"),
        format: root.child_text("Format"),
        recognition: root.child_text("Recognition"),
        thumb_media_id: root.child_text("ThumbMediaId"),
        location_x: optional_number(&root, "Location_X"),
        location_y: optional_number(&root, "Location_Y"),
        scale: optional_number(&root, "Scale"),
        label: root.child_text("Label"),
        title: root.child_text("Title"),
        description: root.child_text("Description"),
        url: root.child_text("Url"),
        file_name: root.child_text("FileName"),
        file_size: optional_number(&root, "FileSize"),
        event: root.child_text("Event"),
        event_key: root.child_text("EventKey"),
        app_type: root.child_text("AppType"),
        quote: root.child("Quote").map(parse_quote),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEXT: &str = "<xml><ToUserName><![CDATA[wwCORP]]></ToUserName>\
        <FromUserName><![CDATA[zhangsan]]></FromUserName>\
        <CreateTime>1700000000</CreateTime><MsgType><![CDATA[text]]></MsgType>\
        <Content><![CDATA[hello & <world>]]></Content><MsgId>1234567890</MsgId>\
        <AgentID>1000002</AgentID></xml>";

    #[test]
    fn test_parse_text_message() {
        let m = parse_message(TEXT).unwrap();
        assert_eq!(m.msg_type, MsgType::Text);
        assert_eq!(m.from_user, "zhangsan");
        assert_eq!(m.to_user.as_deref(), Some("wwCORP"));
        assert_eq!(m.content.as_deref(), Some("hello & <world>"));
        assert_eq!(m.create_time, Some(1_700_000_000));
        assert_eq!(m.msg_id.as_deref(), Some("1234567890"));
        assert_eq!(m.agent_id, Some(1000002));
        assert_eq!(m.media_id, None);
        assert!(m.quote.is_none());
    }

    #[test]
    fn test_quote_fields_stay_nested() {
        let xml = "<xml><FromUserName>alice</FromUserName><MsgType>text</MsgType>\
            <Content>top</Content><MsgId>200</MsgId>\
            <Quote><MsgId>100</MsgId><Content>quoted</Content>\
            <FromUserName>bob</FromUserName><MsgType>text</MsgType></Quote>\
            <CreateTime>1700000000</CreateTime></xml>";
        let m = parse_message(xml).unwrap();
        assert_eq!(m.content.as_deref(), Some("top"));
        assert_eq!(m.msg_id.as_deref(), Some("200"));
        assert_eq!(m.from_user, "alice");

        let q = m.quote.unwrap();
        assert_eq!(q.quoted_msg_id.as_deref(), Some("100"));
        assert_eq!(q.quoted_content.as_deref(), Some("quoted"));
        assert_eq!(q.quoted_from_user.as_deref(), Some("bob"));
        assert_eq!(q.quoted_msg_type.as_deref(), Some("text"));
    }

    #[test]
    fn test_quote_before_top_level_fields() {
        // Quote first: a last-value-wins flat parser would pick up the quoted values.
        let xml = "<xml><Quote><MsgId>1</MsgId><Content>old</Content></Quote>\
            <FromUserName>alice</FromUserName><MsgType>text</MsgType>\
            <MsgId>2</MsgId><Content>new</Content></xml>";
        let m = parse_message(xml).unwrap();
        assert_eq!(m.msg_id.as_deref(), Some("2"));
        assert_eq!(m.content.as_deref(), Some("new"));
        assert_eq!(m.quote.unwrap().quoted_msg_id.as_deref(), Some("1"));
    }

    #[test]
    fn test_location_numbers() {
        let xml = "<xml><FromUserName>u</FromUserName><MsgType>location</MsgType>\
            <Location_X>23.134521</Location_X><Location_Y>113.358803</Location_Y>\
            <Scale>20</Scale><Label><![CDATA[广州市]]></Label><CreateTime>1</CreateTime></xml>";
        let m = parse_message(xml).unwrap();
        assert_eq!(m.msg_type, MsgType::Location);
        assert_eq!(m.location_x, Some(23.134521));
        assert_eq!(m.location_y, Some(113.358803));
        assert_eq!(m.scale, Some(20));
        assert_eq!(m.label.as_deref(), Some("广州市"));
    }

    #[test]
    fn test_event_and_file_shapes() {
        let event = "<xml><FromUserName>u</FromUserName><MsgType>event</MsgType>\
            <Event>click</Event><EventKey>menu_1</EventKey><CreateTime>1</CreateTime></xml>";
        let m = parse_message(event).unwrap();
        assert_eq!(m.msg_type, MsgType::Event);
        assert_eq!(m.event.as_deref(), Some("click"));
        assert_eq!(m.event_key.as_deref(), Some("menu_1"));
        assert!(m.msg_id.is_none());

        let file = "<xml><FromUserName>u</FromUserName><MsgType>file</MsgType>\
            <FileName>a.pdf</FileName><FileSize>not-a-number</FileSize>\
            <MediaId>m1</MediaId></xml>";
        let m = parse_message(file).unwrap();
        assert_eq!(m.file_name.as_deref(), Some("a.pdf"));
        assert_eq!(m.file_size, None);
        assert_eq!(m.create_time, None);
    }

    #[test]
    fn test_empty_and_self_closing_fields_are_none() {
        let xml = "<xml><FromUserName>u</FromUserName><MsgType>image</MsgType>\
            <PicUrl/><MediaId><![CDATA[]]></MediaId></xml>";
        let m = parse_message(xml).unwrap();
        assert_eq!(m.pic_url, None);
        assert_eq!(m.media_id, None);
    }

    #[test]
    fn test_malformed_xml() {
        for bad in [
            "",
            "not xml",
            "<xml><Content>hi</xml>",
            "<xml><Content>hi</Content>",
            "<xml></xml><xml></xml>",
        ] {
            let err = parse_tree(bad).unwrap_err();
            assert!(matches!(err, CallbackError::XmlParse { .. }), "{:?} -> {:?}", bad, err);
        }
    }

    #[test]
    fn test_missing_or_unknown_fields() {
        let no_type = "<xml><FromUserName>u</FromUserName></xml>";
        assert!(matches!(parse_message(no_type), Err(CallbackError::XmlParse { .. })));

        let unknown = "<xml><FromUserName>u</FromUserName><MsgType>mpnews</MsgType></xml>";
        assert!(matches!(parse_message(unknown), Err(CallbackError::XmlParse { .. })));

        let no_sender = "<xml><MsgType>text</MsgType></xml>";
        assert!(matches!(parse_message(no_sender), Err(CallbackError::XmlParse { .. })));

        let bad_time = "<xml><FromUserName>u</FromUserName><MsgType>text</MsgType>\
            <CreateTime>yesterday</CreateTime></xml>";
        assert!(matches!(parse_message(bad_time), Err(CallbackError::XmlParse { .. })));
    }

    #[test]
    fn test_parse_error_keeps_input() {
        match parse_message("<xml><Content>hi</xml>") {
            Err(CallbackError::XmlParse { input, .. }) => assert!(input.starts_with("<xml>")),
            other => panic!("expected XmlParse, got {:?}", other),
        }
    }
}
