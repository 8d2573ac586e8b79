//! Protocol layer tests — envelopes, error kinds, framing, and schemas.

#[cfg(test)]
mod tests {
    use edl_protocol::auth::AuthConfig;
    use edl_protocol::codec::MalformedMessage;
    use edl_protocol::*;
    use serde_json::json;

    fn decoder() -> FrameDecoder {
        FrameDecoder::new(1024)
    }

    fn expect_command(frame: Option<DecodedFrame>) -> CommandEnvelope {
        match frame {
            Some(DecodedFrame::Command(cmd)) => cmd,
            other => panic!("expected command frame, got {other:?}"),
        }
    }

    fn expect_malformed(frame: Option<DecodedFrame>) -> MalformedMessage {
        match frame {
            Some(DecodedFrame::Malformed(m)) => m,
            other => panic!("expected malformed frame, got {other:?}"),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Envelopes
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn command_deserialized_from_wire_format() {
        let wire = br#"{"id":"1","command":"createGraphNode","params":{"graph":"G1","nodeType":"Branch"}}"#;
        let cmd = decode_command(wire).unwrap();
        assert_eq!(cmd.id, "1");
        assert_eq!(cmd.command, "createGraphNode");
        assert_eq!(cmd.params["nodeType"], "Branch");
        assert_eq!(cmd.timeout_ms, None);
    }

    #[test]
    fn command_without_params_defaults_to_empty_object() {
        let cmd = decode_command(br#"{"id":"a","command":"listCommands"}"#).unwrap();
        assert_eq!(cmd.params, json!({}));
    }

    #[test]
    fn command_timeout_is_parsed() {
        let cmd = decode_command(br#"{"id":"a","command":"x","params":{},"timeoutMs":250}"#).unwrap();
        assert_eq!(cmd.timeout_ms, Some(250));
    }

    #[test]
    fn success_response_serialization() {
        let resp = ResponseEnvelope::success("1", json!({"nodeId": "N42"}));
        let parsed: serde_json::Value = serde_json::to_value(&resp).unwrap();
        assert_eq!(parsed, json!({"id": "1", "ok": true, "result": {"nodeId": "N42"}}));
    }

    #[test]
    fn error_response_serialization() {
        let resp = ResponseEnvelope::failure(Some("2".into()), EditorError::unknown_command("unknownCmd"));
        let parsed: serde_json::Value = serde_json::to_value(&resp).unwrap();
        assert_eq!(
            parsed,
            json!({
                "id": "2",
                "ok": false,
                "error": {"kind": "NotFound", "message": "unknown command: unknownCmd"}
            })
        );
    }

    #[test]
    fn error_response_without_id_serializes_null() {
        let resp = ResponseEnvelope::failure(None, EditorError::framing("stream corrupted"));
        let parsed: serde_json::Value = serde_json::to_value(&resp).unwrap();
        assert!(parsed["id"].is_null());
        assert_eq!(parsed["error"]["kind"], "FramingError");
    }

    #[test]
    fn error_detail_field_merges_into_object() {
        let err = EditorError::validation("bad")
            .with_detail(json!({"issues": []}))
            .with_detail_field("command", json!("createGraph"));
        let detail = err.detail.unwrap();
        assert_eq!(detail["command"], "createGraph");
        assert!(detail["issues"].is_array());
    }

    #[test]
    fn only_framing_errors_are_connection_fatal() {
        assert!(ErrorKind::FramingError.is_connection_fatal());
        for kind in [
            ErrorKind::ValidationFailed,
            ErrorKind::NotFound,
            ErrorKind::Busy,
            ErrorKind::EngineStateConflict,
            ErrorKind::Timeout,
            ErrorKind::Internal,
        ] {
            assert!(!kind.is_connection_fatal(), "{kind} should be request-scoped");
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Codec
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn encode_then_decode_command_is_identity() {
        let cmd = CommandEnvelope::new("7", "compileGraph", json!({"graph": "G1"})).with_timeout_ms(5000);
        let bytes = encode_command(&cmd).unwrap();
        assert_eq!(*bytes.last().unwrap(), b'\n');

        let mut dec = decoder();
        dec.extend(&bytes);
        assert_eq!(expect_command(dec.next_frame().unwrap()), cmd);
        assert_eq!(dec.buffered(), 0);
    }

    #[test]
    fn encode_then_decode_response_is_identity() {
        let resp = ResponseEnvelope::failure(
            Some("9".into()),
            EditorError::conflict("graph is compiling").with_detail(json!({"graph": "G1"})),
        );
        let bytes = encode(&resp).unwrap();
        let parsed: ResponseEnvelope = serde_json::from_slice(&bytes[..bytes.len() - 1]).unwrap();
        assert_eq!(parsed, resp);
    }

    #[test]
    fn partial_reads_are_buffered_until_delimiter() {
        let wire = b"{\"id\":\"1\",\"command\":\"getGraph\",\"params\":{\"graph\":\"G1\"}}\n";
        let mut dec = decoder();
        for chunk in wire.chunks(5) {
            dec.extend(chunk);
            if dec.buffered() < wire.len() {
                assert!(dec.next_frame().unwrap().is_none());
            }
        }
        let cmd = expect_command(dec.next_frame().unwrap());
        assert_eq!(cmd.command, "getGraph");
    }

    #[test]
    fn multiple_frames_in_one_read() {
        let mut dec = decoder();
        dec.extend(b"{\"id\":\"1\",\"command\":\"a\"}\n{\"id\":\"2\",\"command\":\"b\"}\n{\"id\":\"3\"");
        assert_eq!(expect_command(dec.next_frame().unwrap()).id, "1");
        assert_eq!(expect_command(dec.next_frame().unwrap()).id, "2");
        assert!(dec.next_frame().unwrap().is_none());
        dec.extend(b",\"command\":\"c\"}\r\n");
        assert_eq!(expect_command(dec.next_frame().unwrap()).id, "3");
    }

    #[test]
    fn blank_lines_are_skipped() {
        let mut dec = decoder();
        dec.extend(b"\n  \r\n{\"id\":\"1\",\"command\":\"a\"}\n");
        assert_eq!(expect_command(dec.next_frame().unwrap()).id, "1");
    }

    #[test]
    fn malformed_json_is_recoverable() {
        let mut dec = decoder();
        dec.extend(b"{not json}\n{\"id\":\"2\",\"command\":\"a\"}\n");
        let bad = expect_malformed(dec.next_frame().unwrap());
        assert_eq!(bad.id, None);
        assert_eq!(bad.error.kind, ErrorKind::ValidationFailed);
        assert_eq!(expect_command(dec.next_frame().unwrap()).id, "2");
    }

    #[test]
    fn malformed_envelope_keeps_best_effort_id() {
        let bad = decode_command(br#"{"id":"5","params":{}}"#).unwrap_err();
        assert_eq!(bad.id.as_deref(), Some("5"));
        assert!(bad.error.message.contains("command"));

        let bad = decode_command(br#"{"id":"6","command":"x","params":[1,2]}"#).unwrap_err();
        assert_eq!(bad.id.as_deref(), Some("6"));

        let bad = decode_command(br#"{"id":"7","command":"x","timeoutMs":-3}"#).unwrap_err();
        assert_eq!(bad.id.as_deref(), Some("7"));
    }

    #[test]
    fn malformed_streams_never_produce_commands() {
        let cases: [&[u8]; 6] = [
            b"[]",
            b"42",
            b"{\"command\":\"a\"}",
            b"{\"id\":\"\",\"command\":\"a\"}",
            b"{\"id\":3,\"command\":\"a\"}",
            b"\xff\xfe{}",
        ];
        for case in cases {
            assert!(decode_command(case).is_err(), "decoded {:?}", String::from_utf8_lossy(case));
        }
    }

    #[test]
    fn oversized_frame_is_fatal() {
        let mut dec = FrameDecoder::new(16);
        dec.extend(&[b'x'; 32]);
        assert!(matches!(
            dec.next_frame(),
            Err(FramingError::FrameTooLarge { len: 32, max: 16 })
        ));
    }

    #[test]
    fn oversized_delimited_frame_is_fatal() {
        let mut dec = FrameDecoder::new(8);
        dec.extend(b"{\"id\":\"1\",\"command\":\"a\"}\n");
        assert!(dec.next_frame().is_err());
    }

    // ─────────────────────────────────────────────────────────────────────
    // Schemas and scopes
    // ─────────────────────────────────────────────────────────────────────

    fn node_descriptor() -> CommandDescriptor {
        CommandDescriptor::mutation("createGraphNode", "Add a node")
            .param(ParamField::required("graph", ParamKind::String, "Graph asset"))
            .param(ParamField::required("nodeType", ParamKind::String, "Node class"))
            .param(ParamField::optional("posX", ParamKind::Number, "X position"))
            .param(ParamField::optional("policy", ParamKind::one_of(&["Instant", "Infinite"]), "Policy"))
            .scope(ScopeRule::asset("graph", "graph"))
    }

    #[test]
    fn schema_accepts_valid_params() {
        let d = node_descriptor();
        d.params
            .validate(&json!({"graph": "G1", "nodeType": "Branch", "posX": 1.5, "policy": "Instant"}))
            .unwrap();
    }

    #[test]
    fn schema_collects_every_issue() {
        let d = node_descriptor();
        let err = d
            .params
            .validate(&json!({"graph": 3, "posX": "left", "policy": "Sometimes", "extra": true}))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValidationFailed);
        let issues = err.detail.unwrap()["issues"].as_array().unwrap().clone();
        let fields: Vec<&str> = issues.iter().map(|i| i["field"].as_str().unwrap()).collect();
        assert_eq!(fields, vec!["graph", "nodeType", "posX", "policy", "extra"]);
    }

    #[test]
    fn schema_rejects_non_object_params() {
        let err = ParamSchema::default().validate(&json!([1])).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValidationFailed);
    }

    #[test]
    fn scope_rule_resolves_from_params() {
        let d = node_descriptor();
        assert_eq!(
            d.scope.resolve(&json!({"graph": "G1"})),
            ResourceScope::Asset("graph:G1".into())
        );
        assert_eq!(d.scope.resolve(&json!({})), ResourceScope::Global);
        assert_eq!(
            ScopeRule::Fixed("tags:".into()).resolve(&json!({})),
            ResourceScope::Asset("tags:".into())
        );
    }

    #[test]
    fn scope_overlap_rules() {
        let g1 = ResourceScope::Asset("graph:G1".into());
        let g2 = ResourceScope::Asset("graph:G2".into());
        assert!(g1.overlaps(&g1.clone()));
        assert!(!g1.overlaps(&g2));
        assert!(ResourceScope::Global.overlaps(&g2));
        assert!(!ResourceScope::Unscoped.overlaps(&ResourceScope::Global));
    }

    #[test]
    fn any_of_claims_every_candidate_asset() {
        let save = ScopeRule::AnyOf(vec![
            ScopeRule::asset("graph", "path"),
            ScopeRule::asset("widget", "path"),
            ScopeRule::Fixed("effects:".into()),
        ]);
        let scope = save.resolve(&json!({"path": "G1"}));
        assert_eq!(
            scope,
            ResourceScope::Assets(vec!["graph:G1".into(), "widget:G1".into(), "effects:".into()])
        );
        assert!(scope.overlaps(&ResourceScope::Asset("graph:G1".into())));
        assert!(ResourceScope::Asset("effects:".into()).overlaps(&scope));
        assert!(!scope.overlaps(&ResourceScope::Asset("graph:G2".into())));
        assert!(!scope.overlaps(&ResourceScope::Unscoped));

        // A missing parameter widens the whole claim.
        assert_eq!(save.resolve(&json!({})), ResourceScope::Global);
    }

    #[test]
    fn describe_publishes_schema() {
        let d = node_descriptor().describe();
        assert_eq!(d["name"], "createGraphNode");
        assert_eq!(d["mutating"], true);
        assert_eq!(d["affinity"], "EditorThread");
        assert_eq!(d["scope"]["kind"], "graph");
        assert_eq!(d["params"][0]["name"], "graph");
        assert_eq!(d["params"][3]["enum"], json!(["Instant", "Infinite"]));
    }

    // ─────────────────────────────────────────────────────────────────────
    // Auth
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn auth_config_compares_tokens() {
        let cfg = AuthConfig::new("s3cret");
        assert!(cfg.accepts("s3cret"));
        assert!(!cfg.accepts("s3cre"));
        assert!(!cfg.accepts("S3cret"));
    }
}
