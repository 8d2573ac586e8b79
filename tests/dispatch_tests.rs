//! Dispatch tests — admission, ordering, cancellation, and timeouts driven
//! tick by tick against the sandbox editor, without a network in between.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use edl_protocol::{CommandEnvelope, ConnectionId, ErrorKind, ResponseEnvelope};
    use edl_sandbox::SandboxEditor;
    use edl_sandbox::graph::CompileStatus;
    use edl_server::{Admission, EditorExecutor, LifecycleState, ServerConfig, ServerContext, TickDriver};
    use serde_json::{Value, json};
    use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

    struct Client {
        id: ConnectionId,
        tx: UnboundedSender<ResponseEnvelope>,
        rx: UnboundedReceiver<ResponseEnvelope>,
    }

    impl Client {
        fn new() -> Self {
            let (tx, rx) = unbounded_channel();
            Self {
                id: ConnectionId::new(),
                tx,
                rx,
            }
        }

        fn submit(&self, ctx: &ServerContext, id: &str, command: &str, params: Value) -> Admission {
            ctx.submit_command(self.id, CommandEnvelope::new(id, command, params), &self.tx)
        }

        fn submit_with_timeout(
            &self,
            ctx: &ServerContext,
            id: &str,
            command: &str,
            params: Value,
            timeout_ms: u64,
        ) -> Admission {
            let envelope = CommandEnvelope::new(id, command, params).with_timeout_ms(timeout_ms);
            ctx.submit_command(self.id, envelope, &self.tx)
        }

        fn responses(&mut self) -> Vec<ResponseEnvelope> {
            let mut out = Vec::new();
            while let Ok(response) = self.rx.try_recv() {
                out.push(response);
            }
            out
        }
    }

    fn setup(config: ServerConfig, editor: SandboxEditor) -> (Arc<ServerContext>, EditorExecutor<SandboxEditor>) {
        let ctx = ServerContext::builder(config)
            .register_all(edl_sandbox::descriptors())
            .unwrap()
            .build();
        let executor = EditorExecutor::new(ctx.clone(), editor);
        (ctx, executor)
    }

    fn default_setup() -> (Arc<ServerContext>, EditorExecutor<SandboxEditor>) {
        setup(
            ServerConfig::default(),
            SandboxEditor::new().with_graph("G1").with_graph("G2"),
        )
    }

    fn ids(responses: &[ResponseEnvelope]) -> Vec<&str> {
        responses.iter().filter_map(|r| r.id.as_deref()).collect()
    }

    fn node(graph: &str) -> Value {
        json!({"graph": graph, "nodeType": "Branch"})
    }

    // ─────────────────────────────────────────────────────────────────────
    // Ordering
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn mutations_run_in_arrival_order_across_connections() {
        let (ctx, mut executor) = default_setup();
        let mut a = Client::new();
        let mut b = Client::new();

        a.submit(&ctx, "a1", "createGraphNode", node("G1"));
        b.submit(&ctx, "b1", "createGraphNode", node("G1"));
        a.submit(&ctx, "a2", "createGraphNode", node("G1"));

        let report = executor.tick();
        assert_eq!(report.started, 3);
        assert_eq!(report.completed, 3);

        let a_nodes: Vec<Value> = a.responses().into_iter().map(|r| r.result.unwrap()["nodeId"].clone()).collect();
        let b_nodes: Vec<Value> = b.responses().into_iter().map(|r| r.result.unwrap()["nodeId"].clone()).collect();
        assert_eq!(a_nodes, vec![json!("N1"), json!("N3")]);
        assert_eq!(b_nodes, vec![json!("N2")]);
    }

    #[test]
    fn read_waits_for_running_compile_on_same_graph() {
        let (ctx, mut executor) = default_setup();
        let mut client = Client::new();

        client.submit(&ctx, "compile", "compileGraph", json!({"graph": "G1"}));
        client.submit(&ctx, "read-g1", "getGraph", json!({"graph": "G1"}));
        client.submit(&ctx, "read-g2", "getGraph", json!({"graph": "G2"}));

        let first = executor.tick();
        assert_eq!(first.started, 2);
        assert_eq!(first.in_flight, 1);
        assert_eq!(ids(&client.responses()), ["read-g2"]);

        let mut rest = Vec::new();
        for _ in 0..10 {
            executor.tick();
            rest.extend(client.responses());
        }
        assert_eq!(ids(&rest), ["compile", "read-g1"]);
        assert_eq!(rest[1].result.as_ref().unwrap()["status"], "UpToDate");
        assert!(executor.is_idle());
    }

    #[test]
    fn save_waits_for_compile_on_same_graph() {
        let (ctx, mut executor) = default_setup();
        let mut client = Client::new();
        client.submit(&ctx, "compile", "compileGraph", json!({"graph": "G1"}));
        client.submit(&ctx, "save", "saveAsset", json!({"path": "G1"}));

        let mut responses = Vec::new();
        for _ in 0..10 {
            executor.tick();
            responses.extend(client.responses());
        }
        assert_eq!(ids(&responses), ["compile", "save"]);
        assert!(responses.iter().all(ResponseEnvelope::is_success));
        assert_eq!(responses[1].result.as_ref().unwrap()["saved"], true);
        assert!(executor.editor().is_saved("G1"));
    }

    #[test]
    fn independent_graphs_share_a_tick() {
        let (ctx, mut executor) = default_setup();
        let client = Client::new();
        client.submit(&ctx, "1", "compileGraph", json!({"graph": "G1"}));
        client.submit(&ctx, "2", "createGraphNode", node("G2"));
        client.submit(&ctx, "3", "getGraph", json!({"graph": "G2"}));

        let report = executor.tick();
        assert_eq!(report.started, 3);
        assert_eq!(report.in_flight, 1);
    }

    #[test]
    fn batch_size_limits_starts_per_tick() {
        let (ctx, mut executor) = setup(
            ServerConfig {
                batch_size: 2,
                ..Default::default()
            },
            SandboxEditor::new(),
        );
        let client = Client::new();
        for i in 0..5 {
            client.submit(&ctx, &i.to_string(), "createGraph", json!({"graph": format!("G{i}")}));
        }
        assert_eq!(executor.tick().started, 2);
        assert_eq!(executor.tick().started, 2);
        assert_eq!(executor.tick().started, 1);
        assert!(executor.is_idle());
    }

    // ─────────────────────────────────────────────────────────────────────
    // Admission
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn flood_past_capacity_is_busy() {
        let (ctx, _executor) = setup(
            ServerConfig {
                queue_capacity: 50,
                ..Default::default()
            },
            SandboxEditor::new(),
        );
        let mut client = Client::new();

        for i in 0..50 {
            let admission = client.submit(&ctx, &i.to_string(), "createGraph", json!({"graph": format!("G{i}")}));
            assert!(matches!(admission, Admission::Queued { .. }), "request {i}");
        }
        let admission = client.submit(&ctx, "50", "createGraph", json!({"graph": "G50"}));
        assert_eq!(admission, Admission::Rejected(ErrorKind::Busy));

        let responses = client.responses();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].id.as_deref(), Some("50"));
        assert_eq!(responses[0].error.as_ref().unwrap().kind, ErrorKind::Busy);
        assert_eq!(ctx.queue().len(), 50);
    }

    #[test]
    fn list_commands_answers_while_queue_is_full() {
        let (ctx, _executor) = setup(
            ServerConfig {
                queue_capacity: 1,
                ..Default::default()
            },
            SandboxEditor::new(),
        );
        let mut client = Client::new();
        client.submit(&ctx, "1", "createGraph", json!({"graph": "G1"}));

        assert_eq!(client.submit(&ctx, "2", "listCommands", json!({})), Admission::Answered);
        let responses = client.responses();
        assert_eq!(ids(&responses), ["2"]);
        assert!(responses[0].is_success());
    }

    #[test]
    fn duplicate_id_on_one_connection_is_rejected() {
        let (ctx, _executor) = default_setup();
        let mut a = Client::new();
        let b = Client::new();

        a.submit(&ctx, "1", "getGraph", json!({"graph": "G1"}));
        let dup = a.submit(&ctx, "1", "getGraph", json!({"graph": "G2"}));
        assert_eq!(dup, Admission::Rejected(ErrorKind::ValidationFailed));
        assert_eq!(ctx.queue().len(), 1);
        assert_eq!(a.responses().len(), 1);

        let other = b.submit(&ctx, "1", "getGraph", json!({"graph": "G1"}));
        assert!(matches!(other, Admission::Queued { .. }));
    }

    #[test]
    fn handler_failure_carries_command_name() {
        let (ctx, mut executor) = default_setup();
        let mut client = Client::new();
        client.submit(&ctx, "1", "getGraph", json!({"graph": "Missing"}));
        executor.tick();

        let error = client.responses().remove(0).error.unwrap();
        assert_eq!(error.kind, ErrorKind::NotFound);
        assert_eq!(error.detail.unwrap()["command"], "getGraph");
    }

    // ─────────────────────────────────────────────────────────────────────
    // Cancellation
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn disconnect_mid_compile_discards_result() {
        let (ctx, mut executor) = setup(
            ServerConfig::default(),
            SandboxEditor::new().with_graph("G1").with_compile_ticks(3),
        );
        let mut client = Client::new();
        client.submit(&ctx, "1", "compileGraph", json!({"graph": "G1"}));

        let report = executor.tick();
        assert_eq!(report.in_flight, 1);

        ctx.cancel_connection(client.id);

        let mut completed = 0;
        for _ in 0..5 {
            completed += executor.tick().completed;
        }
        assert_eq!(completed, 0);
        assert_eq!(executor.in_flight(), 0);
        assert_eq!(
            executor.editor().graph("G1").unwrap().status(),
            CompileStatus::UpToDate
        );
        assert!(ctx.tracker().is_empty());
        assert!(executor.is_idle());
        assert!(client.responses().is_empty());
    }

    #[test]
    fn cancelled_compile_outlives_its_deadline() {
        let (ctx, mut executor) = setup(
            ServerConfig::default(),
            SandboxEditor::new().with_graph("G1").with_compile_ticks(3),
        );
        let mut client = Client::new();
        client.submit_with_timeout(&ctx, "1", "compileGraph", json!({"graph": "G1"}), 50);
        executor.tick();
        ctx.cancel_connection(client.id);

        let late = executor.tick_at(Instant::now() + Duration::from_secs(1));
        assert_eq!(late.timed_out, 0);
        assert_eq!(late.abandoned, 0);
        for _ in 0..5 {
            executor.tick();
        }

        assert_eq!(executor.editor().pending_continuations(), 0);
        assert_eq!(
            executor.editor().graph("G1").unwrap().status(),
            CompileStatus::UpToDate
        );
        assert!(ctx.tracker().is_empty());
        assert!(executor.is_idle());
        assert!(client.responses().is_empty());
    }

    #[test]
    fn cancelled_queued_request_never_executes() {
        let (ctx, mut executor) = default_setup();
        let mut client = Client::new();
        client.submit(&ctx, "1", "createGraph", json!({"graph": "G3"}));
        client.submit(&ctx, "2", "createGraphNode", node("G1"));

        assert_eq!(ctx.cancel_connection(client.id), 2);
        let report = executor.tick();
        assert_eq!(report.started, 0);
        assert!(executor.editor().history().is_empty());
        assert!(client.responses().is_empty());
    }

    #[test]
    fn disconnect_leaves_other_connections_alone() {
        let (ctx, mut executor) = default_setup();
        let gone = Client::new();
        let mut stays = Client::new();
        gone.submit(&ctx, "1", "createGraphNode", node("G1"));
        stays.submit(&ctx, "1", "createGraphNode", node("G1"));

        ctx.cancel_connection(gone.id);
        executor.tick();

        let responses = stays.responses();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].result.as_ref().unwrap()["nodeId"], "N1");
    }

    // ─────────────────────────────────────────────────────────────────────
    // Timeouts
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn queued_request_times_out_without_executing() {
        let (ctx, mut executor) = default_setup();
        let mut client = Client::new();
        client.submit_with_timeout(&ctx, "1", "createGraphNode", node("G1"), 10);

        let report = executor.tick_at(Instant::now() + Duration::from_millis(50));
        assert_eq!(report.timed_out, 1);
        assert_eq!(report.started, 0);

        let responses = client.responses();
        assert_eq!(responses[0].error.as_ref().unwrap().kind, ErrorKind::Timeout);
        assert!(executor.editor().history().is_empty());
        assert!(executor.is_idle());
    }

    #[test]
    fn continuation_past_deadline_is_released() {
        let (ctx, mut executor) = setup(
            ServerConfig::default(),
            SandboxEditor::new().with_graph("G1").with_compile_ticks(100),
        );
        let mut client = Client::new();
        client.submit_with_timeout(&ctx, "1", "compileGraph", json!({"graph": "G1"}), 100);

        executor.tick();
        assert_eq!(executor.in_flight(), 1);
        assert_eq!(
            executor.editor().graph("G1").unwrap().status(),
            CompileStatus::Compiling
        );

        executor.tick_at(Instant::now() + Duration::from_secs(1));
        assert_eq!(executor.in_flight(), 0);
        assert_eq!(executor.editor().pending_continuations(), 0);
        assert_eq!(
            executor.editor().graph("G1").unwrap().status(),
            CompileStatus::Dirty
        );

        let responses = client.responses();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].error.as_ref().unwrap().kind, ErrorKind::Timeout);
    }

    #[test]
    fn default_timeout_applies_without_client_deadline() {
        let (ctx, mut executor) = setup(
            ServerConfig {
                default_timeout_ms: 20,
                ..Default::default()
            },
            SandboxEditor::new().with_graph("G1"),
        );
        let mut client = Client::new();
        client.submit(&ctx, "1", "getGraph", json!({"graph": "G1"}));

        executor.tick_at(Instant::now() + Duration::from_millis(100));
        assert_eq!(client.responses()[0].error.as_ref().unwrap().kind, ErrorKind::Timeout);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Shutdown
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn shutdown_drains_finished_work() {
        let (ctx, mut executor) = default_setup();
        let mut client = Client::new();
        client.submit(&ctx, "1", "createGraphNode", node("G1"));

        let driver = TickDriver::new(Duration::from_millis(1));
        driver.shutdown(&mut executor, Duration::from_millis(200));

        assert_eq!(ctx.state(), LifecycleState::Stopped);
        let responses = client.responses();
        assert!(responses[0].is_success());

        let late = client.submit(&ctx, "2", "listCommands", json!({}));
        assert_eq!(late, Admission::Rejected(ErrorKind::ShuttingDown));
    }

    #[test]
    fn shutdown_force_cancels_after_grace() {
        let (ctx, mut executor) = setup(
            ServerConfig::default(),
            SandboxEditor::new().with_graph("G1").with_compile_ticks(10_000),
        );
        let mut client = Client::new();
        client.submit(&ctx, "1", "compileGraph", json!({"graph": "G1"}));
        client.submit(&ctx, "2", "getGraph", json!({"graph": "G1"}));
        executor.tick();

        let driver = TickDriver::new(Duration::from_millis(1));
        driver.shutdown(&mut executor, Duration::from_millis(20));

        let responses = client.responses();
        assert_eq!(responses.len(), 2);
        assert!(
            responses
                .iter()
                .all(|r| r.error.as_ref().unwrap().kind == ErrorKind::ShuttingDown)
        );
        assert_eq!(executor.in_flight(), 0);
        assert!(ctx.is_idle());
        assert_eq!(
            executor.editor().graph("G1").unwrap().status(),
            CompileStatus::Dirty
        );
        assert_eq!(ctx.state(), LifecycleState::Stopped);
    }
}
