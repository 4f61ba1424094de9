//! Event-to-wire encoder
//!
//! Turns one [`ExecutionEvent`] of a run into one results-channel
//! [`proto::Message`]. Encoding never fails: argument values that cannot be
//! rendered as JSON fall back to their string coercion.

use fleetrun_durable::{
    ActionSender, Argument, ArgumentSource, ArgumentValue, ExecutionContext, ExecutionElement,
    ExecutionEvent, UserMessage,
};
use fleetrun_internal_protocol::proto::{self, argument::Source, message};
use fleetrun_internal_protocol::to_wire_json;
use tracing::debug;

/// Device id reported for actions without a device
pub const NO_DEVICE: i64 = -1;

/// Encode one event emitted by the run identified by `ctx`
pub fn encode_event(ctx: &ExecutionContext, event: &ExecutionEvent) -> proto::Message {
    let (kind, packet) = match event {
        ExecutionEvent::Workflow { data, .. } => (
            message::MessageType::Workflowpacket,
            message::Packet::WorkflowPacket(proto::WorkflowPacket {
                additional_data: data.as_ref().map(to_wire_json),
                sender: Some(workflow_reference(ctx)),
            }),
        ),
        ExecutionEvent::MessageSent(user_message) => (
            message::MessageType::Usermessage,
            message::Packet::MessagePacket(encode_user_message(ctx, user_message)),
        ),
        ExecutionEvent::Action { sender, data, .. } => (
            message::MessageType::Actionpacket,
            message::Packet::ActionPacket(proto::ActionPacket {
                additional_data: data.as_ref().map(to_wire_json),
                sender: Some(encode_action_sender(sender)),
                workflow: Some(workflow_reference(ctx)),
            }),
        ),
        ExecutionEvent::Element { sender, .. } => (
            message::MessageType::Generalpacket,
            message::Packet::GeneralPacket(proto::GeneralPacket {
                sender: Some(encode_element(sender.as_ref())),
                workflow: Some(workflow_reference(ctx)),
            }),
        ),
    };

    proto::Message {
        event_name: event.name().to_string(),
        r#type: kind as i32,
        packet: Some(packet),
    }
}

fn workflow_reference(ctx: &ExecutionContext) -> proto::WorkflowReference {
    proto::WorkflowReference {
        name: ctx.workflow_name.clone(),
        id: ctx.workflow_id.to_string(),
        execution_id: ctx.execution_id.to_string(),
    }
}

fn encode_user_message(ctx: &ExecutionContext, message: &UserMessage) -> proto::UserMessage {
    proto::UserMessage {
        subject: message.subject.clone().unwrap_or_default(),
        body: to_wire_json(&message.body),
        workflow: Some(workflow_reference(ctx)),
        users: message
            .users
            .as_ref()
            .map(|ids| proto::RecipientList { ids: ids.clone() }),
        roles: message
            .roles
            .as_ref()
            .map(|ids| proto::RecipientList { ids: ids.clone() }),
        requires_reauth: message.requires_reauth,
    }
}

fn encode_action_sender(sender: &ActionSender) -> proto::ActionSender {
    proto::ActionSender {
        name: sender.name.clone(),
        id: sender.id.to_string(),
        execution_id: sender.execution_id.to_string(),
        app_name: sender.app_name.clone(),
        action_name: sender.action_name.clone(),
        device_id: sender.device_id.unwrap_or(NO_DEVICE),
        arguments: sender.arguments.iter().map(encode_argument).collect(),
    }
}

fn encode_element(sender: &dyn ExecutionElement) -> proto::GeneralSender {
    proto::GeneralSender {
        id: sender.id().to_string(),
        app_name: sender
            .app_scope()
            .map(|scoped| scoped.app_name().to_string()),
    }
}

/// Encode an argument, rendering whichever source it has
pub fn encode_argument(argument: &Argument) -> proto::Argument {
    let source = match &argument.source {
        ArgumentSource::Value(value) => Source::Value(render_value(&argument.name, value.as_ref())),
        ArgumentSource::Reference(reference) => Source::Reference(reference.clone()),
        ArgumentSource::Selection(selection) => {
            Source::Selection(render_value(&argument.name, selection.as_ref()))
        }
    };

    proto::Argument {
        name: argument.name.clone(),
        source: Some(source),
    }
}

/// Strings go out as they are, other values as wire JSON
fn render_value(name: &str, value: &dyn ArgumentValue) -> String {
    match value.to_json() {
        Ok(serde_json::Value::String(text)) => text,
        Ok(json) => to_wire_json(&json),
        Err(e) => {
            debug!(argument = %name, error = %e, "argument is not JSON serializable, coercing");
            value.coerce()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use fleetrun_durable::{
        ActionEventKind, AppScoped, ElementEventKind, WorkflowEventKind,
    };
    use serde_json::json;
    use uuid::Uuid;

    use super::*;

    #[derive(Debug)]
    struct Condition {
        id: Uuid,
        app_name: String,
    }

    impl AppScoped for Condition {
        fn app_name(&self) -> &str {
            &self.app_name
        }
    }

    impl ExecutionElement for Condition {
        fn id(&self) -> Uuid {
            self.id
        }

        fn app_scope(&self) -> Option<&dyn AppScoped> {
            Some(self)
        }
    }

    #[derive(Debug)]
    struct Branch {
        id: Uuid,
    }

    impl ExecutionElement for Branch {
        fn id(&self) -> Uuid {
            self.id
        }
    }

    fn context() -> ExecutionContext {
        ExecutionContext {
            execution_id: Uuid::now_v7(),
            workflow_id: Uuid::now_v7(),
            workflow_name: "nightly-scan".to_string(),
        }
    }

    fn sender(arguments: Vec<Argument>) -> ActionSender {
        ActionSender {
            name: "scan hosts".to_string(),
            id: Uuid::now_v7(),
            execution_id: Uuid::now_v7(),
            app_name: "Nmap".to_string(),
            action_name: "scan".to_string(),
            device_id: None,
            arguments,
        }
    }

    fn action_packet(message: &proto::Message) -> &proto::ActionPacket {
        match &message.packet {
            Some(message::Packet::ActionPacket(packet)) => packet,
            other => panic!("expected action packet, got {:?}", other),
        }
    }

    #[test]
    fn test_workflow_event() {
        let ctx = context();
        let event = ExecutionEvent::Workflow {
            kind: WorkflowEventKind::Paused,
            data: Some(json!({"reason": "manual"})),
        };

        let message = encode_event(&ctx, &event);

        assert_eq!(message.event_name, "WorkflowPaused");
        assert_eq!(message.r#type, message::MessageType::Workflowpacket as i32);
        match message.packet {
            Some(message::Packet::WorkflowPacket(packet)) => {
                assert_eq!(packet.additional_data.as_deref(), Some(r#"{"reason": "manual"}"#));
                let reference = packet.sender.unwrap();
                assert_eq!(reference.name, "nightly-scan");
                assert_eq!(reference.id, ctx.workflow_id.to_string());
                assert_eq!(reference.execution_id, ctx.execution_id.to_string());
            }
            other => panic!("expected workflow packet, got {:?}", other),
        }
    }

    #[test]
    fn test_workflow_event_without_data() {
        let event = ExecutionEvent::Workflow {
            kind: WorkflowEventKind::ExecutionStart,
            data: None,
        };

        match encode_event(&context(), &event).packet {
            Some(message::Packet::WorkflowPacket(packet)) => {
                assert!(packet.additional_data.is_none())
            }
            other => panic!("expected workflow packet, got {:?}", other),
        }
    }

    #[test]
    fn test_action_argument_value_is_wire_json() {
        let event = ExecutionEvent::Action {
            kind: ActionEventKind::ExecutionSuccess,
            sender: sender(vec![Argument::value("x", json!({"a": 1}))]),
            data: Some(json!({"result": [1, 2]})),
        };

        let message = encode_event(&context(), &event);
        let packet = action_packet(&message);

        assert_eq!(message.r#type, message::MessageType::Actionpacket as i32);
        assert_eq!(packet.additional_data.as_deref(), Some(r#"{"result": [1, 2]}"#));
        let argument = &packet.sender.as_ref().unwrap().arguments[0];
        assert_eq!(argument.name, "x");
        assert_eq!(argument.source, Some(Source::Value(r#"{"a": 1}"#.to_string())));
    }

    #[test]
    fn test_action_without_device() {
        let event = ExecutionEvent::Action {
            kind: ActionEventKind::Started,
            sender: sender(vec![]),
            data: None,
        };

        let message = encode_event(&context(), &event);
        let sender = action_packet(&message).sender.as_ref().unwrap();
        assert_eq!(sender.device_id, NO_DEVICE);
        assert_eq!(sender.app_name, "Nmap");
        assert_eq!(sender.action_name, "scan");
    }

    #[test]
    fn test_action_with_device() {
        let mut with_device = sender(vec![]);
        with_device.device_id = Some(12);
        let event = ExecutionEvent::Action {
            kind: ActionEventKind::Started,
            sender: with_device,
            data: None,
        };

        let message = encode_event(&context(), &event);
        assert_eq!(action_packet(&message).sender.as_ref().unwrap().device_id, 12);
    }

    #[test]
    fn test_unserializable_argument_falls_back_to_coercion() {
        let mut pairs = HashMap::new();
        pairs.insert((1, 2), "pair");

        let encoded = encode_argument(&Argument::value("pairs", pairs));

        match encoded.source {
            Some(Source::Value(text)) => {
                assert!(!text.is_empty());
                assert!(text.contains("pair"));
            }
            other => panic!("expected value, got {:?}", other),
        }
    }

    #[test]
    fn test_string_arguments_are_not_quoted() {
        let encoded = encode_argument(&Argument::value("host", "10.0.0.1"));
        assert_eq!(encoded.source, Some(Source::Value("10.0.0.1".to_string())));

        let encoded = encode_argument(&Argument::reference("input", "action-1"));
        assert_eq!(encoded.source, Some(Source::Reference("action-1".to_string())));

        let encoded = encode_argument(&Argument::selection("path", vec!["a", "b"]));
        assert_eq!(
            encoded.source,
            Some(Source::Selection(r#"["a", "b"]"#.to_string()))
        );
    }

    #[test]
    fn test_user_message() {
        let event = ExecutionEvent::MessageSent(UserMessage {
            subject: None,
            body: json!({"text": "approve?"}),
            users: Some(vec![1, 2]),
            roles: None,
            requires_reauth: Some(true),
        });

        let message = encode_event(&context(), &event);

        assert_eq!(message.event_name, "SendMessage");
        assert_eq!(message.r#type, message::MessageType::Usermessage as i32);
        match message.packet {
            Some(message::Packet::MessagePacket(packet)) => {
                assert_eq!(packet.subject, "");
                assert_eq!(packet.body, r#"{"text": "approve?"}"#);
                assert_eq!(packet.users.unwrap().ids, vec![1, 2]);
                assert!(packet.roles.is_none());
                assert_eq!(packet.requires_reauth, Some(true));
            }
            other => panic!("expected message packet, got {:?}", other),
        }
    }

    #[test]
    fn test_element_app_name_only_when_app_scoped() {
        let ctx = context();
        let condition = ExecutionEvent::Element {
            kind: ElementEventKind::ConditionSuccess,
            sender: Arc::new(Condition {
                id: Uuid::now_v7(),
                app_name: "Utilities".to_string(),
            }),
        };
        let branch = ExecutionEvent::Element {
            kind: ElementEventKind::BranchTaken,
            sender: Arc::new(Branch { id: Uuid::now_v7() }),
        };

        let general = |message: proto::Message| match message.packet {
            Some(message::Packet::GeneralPacket(packet)) => packet,
            other => panic!("expected general packet, got {:?}", other),
        };

        let condition = general(encode_event(&ctx, &condition));
        let branch = general(encode_event(&ctx, &branch));

        assert_eq!(
            condition.sender.unwrap().app_name.as_deref(),
            Some("Utilities")
        );
        assert!(branch.sender.unwrap().app_name.is_none());
        assert_eq!(
            branch.workflow.unwrap().execution_id,
            ctx.execution_id.to_string()
        );
    }
}
