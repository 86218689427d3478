//! Unit tests for the connection manager, driven over real loop threads

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::audit::{AuditStatus, MemoryAuditStore};
    use crate::config::{BroadcastConfig, ListenerConfig};
    use crate::parser::rules::MockRuleStore;
    use crate::parser::PatternRule;
    use crate::testing::{FakeFactory, FakeTransport};
    use crate::transport::{DialogKind, SessionIdentity};
    use crate::types::{MarketType, SignalKind};
    use std::path::PathBuf;
    use tokio_test::block_on;

    const WAIT: Duration = Duration::from_secs(3);

    fn config() -> Config {
        Config {
            broadcast: BroadcastConfig {
                base_delay_ms: 10,
                retry_backoff_ms: 10,
                send_timeout_ms: 500,
                enqueue_timeout_ms: 1000,
                drain_timeout_ms: 1000,
                append_timestamp: false,
                ..Default::default()
            },
            listener: ListenerConfig {
                ready_wait_ms: 1000,
                sender_connect_wait_ms: 1000,
                stop_timeout_ms: 1000,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    struct Harness {
        manager: ConnectionManager,
        factory: Arc<FakeFactory>,
        audit: Arc<MemoryAuditStore>,
        statuses: Arc<Mutex<Vec<ConnectionStatus>>>,
        signals: Arc<Mutex<Vec<Signal>>>,
    }

    fn harness_with(config: Config, listener: Arc<FakeTransport>) -> Harness {
        let factory = FakeFactory::new(listener, FakeTransport::new());
        let audit = Arc::new(MemoryAuditStore::new());
        let manager = ConnectionManager::new(config, factory.clone(), audit.clone());

        let statuses = Arc::new(Mutex::new(Vec::new()));
        let signals = Arc::new(Mutex::new(Vec::new()));
        let (status_sink, signal_sink) = (Arc::clone(&statuses), Arc::clone(&signals));
        manager.set_callbacks(
            Callbacks::default()
                .on_status(move |status| status_sink.lock().push(status))
                .on_signal(move |signal| signal_sink.lock().push(signal)),
        );

        Harness {
            manager,
            factory,
            audit,
            statuses,
            signals,
        }
    }

    fn harness() -> Harness {
        harness_with(config(), FakeTransport::new())
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + WAIT;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        condition()
    }

    fn listening(h: &Harness) -> bool {
        h.statuses.lock().contains(&ConnectionStatus::Listening)
    }

    #[test]
    fn test_start_reports_listening() {
        let h = harness();
        h.manager.start().unwrap();
        assert!(h.manager.is_running());
        assert!(wait_for(|| listening(&h)));
        assert!(!h.manager.is_starting());

        let statuses = h.statuses.lock().clone();
        assert_eq!(statuses, vec![ConnectionStatus::Connected, ConnectionStatus::Listening]);

        // A second start is a no-op
        h.manager.start().unwrap();
        assert_eq!(h.factory.created().len(), 1);

        h.manager.stop();
        assert!(!h.manager.is_running());
        assert_eq!(h.statuses.lock().last(), Some(&ConnectionStatus::Stopped));
        assert!(!h.factory.listener.is_connected());
    }

    #[test]
    fn test_inbound_signal_reaches_callback() {
        let h = harness();
        h.manager.start().unwrap();
        assert!(wait_for(|| listening(&h)));

        h.factory.listener.inject(-100, 1, "hello there");
        h.factory.listener.inject(-100, 2, "COPY CASHOUT\nEvento: Roma v Lazio");
        assert!(wait_for(|| !h.signals.lock().is_empty()));

        let signal = h.signals.lock()[0].clone();
        assert_eq!(signal.chat_id, Some(-100));
        assert!(matches!(signal.kind, SignalKind::CopyCashout(ref c) if c.event == "Roma v Lazio"));
        // Nothing acknowledged unless configured
        assert!(h.factory.listener.sent().is_empty());
        h.manager.stop();
    }

    #[test]
    fn test_monitored_chats_filter() {
        let h = harness();
        h.manager.set_monitored_chats(&[1]);
        h.manager.start().unwrap();
        assert!(wait_for(|| listening(&h)));

        h.factory.listener.inject(2, 1, "COPY CASHOUT\nEvento: A v B");
        h.factory.listener.inject(1, 2, "COPY CASHOUT\nEvento: C v D");
        assert!(wait_for(|| !h.signals.lock().is_empty()));
        std::thread::sleep(Duration::from_millis(50));

        let signals = h.signals.lock().clone();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].chat_id, Some(1));
        h.manager.stop();
    }

    #[test]
    fn test_broadcast_then_ack_marks_audit_row() {
        let h = harness();
        h.manager.start().unwrap();
        assert!(wait_for(|| listening(&h)));

        assert!(h.manager.send_message(5, "COPY CASHOUT\nEvento: A v B", Some("cashout-1")));
        assert!(wait_for(|| h.factory.listener.sent().len() == 1));
        assert!(wait_for(|| {
            block_on(h.audit.get(1)).unwrap().is_some_and(|r| r.status == AuditStatus::Sent)
        }));
        let row = block_on(h.audit.get(1)).unwrap().unwrap();
        assert_eq!(row.telegram_msg_id, Some(1000));

        h.factory.listener.inject(5, 3, "ACK 1000");
        assert!(wait_for(|| {
            block_on(h.audit.get(1)).unwrap().is_some_and(|r| r.status == AuditStatus::Acked)
        }));
        // ACKs are consumed, not forwarded
        assert!(h.signals.lock().is_empty());
        h.manager.stop();
    }

    #[test]
    fn test_duplicate_key_is_not_resent() {
        let h = harness();
        h.manager.start().unwrap();
        assert!(wait_for(|| listening(&h)));

        assert!(h.manager.send_message(5, "COPY CASHOUT\nEvento: A v B", Some("k")));
        assert!(h.manager.send_message(5, "COPY CASHOUT\nEvento: A v B", Some("k")));
        assert!(h.manager.send_message(5, "COPY CASHOUT\nEvento: A v B", None));
        assert!(wait_for(|| h.factory.listener.sent().len() == 2));
        assert_eq!(h.audit.len(), 2);
        h.manager.stop();
    }

    #[test]
    fn test_concurrent_sends_with_same_key_queue_once() {
        let h = harness();
        h.manager.start().unwrap();
        assert!(wait_for(|| listening(&h)));

        const ROUNDS: usize = 5;
        const THREADS: usize = 4;
        for round in 0..ROUNDS {
            let key = format!("same-key-{round}");
            let barrier = std::sync::Barrier::new(THREADS);
            let results: Vec<bool> = std::thread::scope(|scope| {
                let workers: Vec<_> = (0..THREADS)
                    .map(|_| {
                        scope.spawn(|| {
                            barrier.wait();
                            h.manager.send_message(5, "COPY CASHOUT\nEvento: A v B", Some(key.as_str()))
                        })
                    })
                    .collect();
                workers.into_iter().map(|w| w.join().unwrap()).collect()
            });
            assert!(results.iter().all(|sent| *sent));
        }

        assert!(wait_for(|| h.factory.listener.sent().len() == ROUNDS));
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(h.factory.listener.sent().len(), ROUNDS);
        assert_eq!(h.audit.len(), ROUNDS);
        h.manager.stop();
    }

    #[test]
    fn test_auto_ack_copy_instructions() {
        let mut config = config();
        config.listener.auto_ack = true;
        config.broadcast.append_timestamp = true;
        let h = harness_with(config, FakeTransport::new());
        h.manager.start().unwrap();
        assert!(wait_for(|| listening(&h)));

        h.factory.listener.inject(9, 77, "COPY CASHOUT\nEvento: Roma v Lazio");
        h.factory.listener.inject(9, 78, "🆚 Roma v Lazio\nOver 2.5 @ 1.90");
        assert!(wait_for(|| h.signals.lock().len() == 2));
        assert!(wait_for(|| !h.factory.listener.sent().is_empty()));
        std::thread::sleep(Duration::from_millis(50));

        // Only the copy instruction is acknowledged, and without a timestamp
        assert_eq!(h.factory.listener.sent(), vec![(9, "ACK 77".to_string())]);
        h.manager.stop();
    }

    #[test]
    fn test_unauthorized_listener_requires_auth() {
        let h = harness_with(config(), FakeTransport::unauthorized());
        h.manager.start().unwrap();
        assert!(wait_for(|| h.statuses.lock().contains(&ConnectionStatus::AuthRequired)));
        assert!(wait_for(|| !h.manager.is_running()));
        assert!(!h.manager.is_starting());
        assert!(!h.statuses.lock().contains(&ConnectionStatus::Listening));
    }

    #[test]
    fn test_connect_failure_reports_error() {
        let listener = FakeTransport::new();
        listener.fail_connect(crate::transport::TransportError::Disconnected);
        let h = harness_with(config(), listener);
        h.manager.start().unwrap();
        assert!(wait_for(|| {
            h.statuses
                .lock()
                .iter()
                .any(|s| matches!(s, ConnectionStatus::Error(_)))
        }));
        assert!(wait_for(|| !h.manager.is_running()));
    }

    #[test]
    fn test_send_without_listener_opens_sender() {
        let mut config = config();
        config.telegram.session_file = Some("/tmp/relay.session".to_string());
        let h = harness_with(config, FakeTransport::new());

        assert_eq!(h.manager.connect_for_sending(), SendReadiness::Ready);
        assert!(h.manager.send_message(3, "hello", None));
        assert!(wait_for(|| h.factory.sender.sent().len() == 1));
        assert!(h.factory.listener.sent().is_empty());

        let created = h.factory.created();
        assert_eq!(
            created,
            vec![(Role::Sender, SessionIdentity::File(PathBuf::from("/tmp/relay.session_send")))]
        );

        // The sender connection is reused
        assert!(h.manager.send_message(3, "again", None));
        assert!(wait_for(|| h.factory.sender.sent().len() == 2));
        assert_eq!(h.factory.created().len(), 1);

        // Starting the listener retires the sender
        h.manager.start().unwrap();
        assert!(wait_for(|| listening(&h)));
        assert!(!h.factory.sender.is_connected());
        h.manager.stop();
    }

    #[test]
    fn test_send_while_listener_starting_is_pending() {
        let mut config = config();
        config.listener.ready_wait_ms = 50;
        let listener = FakeTransport::new();
        listener.set_connect_delay(Duration::from_millis(800));
        let h = harness_with(config, listener);

        h.manager.start().unwrap();
        assert!(h.manager.is_starting());
        assert_eq!(h.manager.connect_for_sending(), SendReadiness::Pending);
        assert!(!h.manager.send_message(3, "hello", Some("early")));
        // No second connection is opened against the same account
        assert!(h.factory.created().iter().all(|(role, _)| *role == Role::Listener));

        assert!(wait_for(|| listening(&h)));
        assert_eq!(h.manager.connect_for_sending(), SendReadiness::Ready);
        assert!(h.manager.send_message(3, "hello", Some("early")));
        assert!(wait_for(|| h.factory.listener.sent().len() == 1));
        assert!(h.factory.sender.sent().is_empty());
        h.manager.stop();
    }

    #[test]
    fn test_sender_connect_failure() {
        let h = harness();
        h.factory.sender.fail_connect(crate::transport::TransportError::Unauthorized);
        assert_eq!(h.manager.connect_for_sending(), SendReadiness::Failed);
        assert!(!h.manager.send_message(3, "hello", Some("k")));
        // A failed send does not poison the dedup cache
        h.manager.start().unwrap();
        assert!(wait_for(|| listening(&h)));
        assert!(h.manager.send_message(3, "hello", Some("k")));
        h.manager.stop();
    }

    #[test]
    fn test_sign_in_flow() {
        let h = harness_with(config(), FakeTransport::unauthorized());
        h.manager.request_code("+390000000").unwrap();
        assert_eq!(h.factory.listener.code_requests(), vec!["+390000000".to_string()]);

        assert!(h.manager.sign_in("+390000000", "00000", None).is_err());
        let session = h.manager.sign_in("+390000000", "12345", None).unwrap();
        assert_eq!(session, "signed-in-session");
        assert_eq!(h.manager.session_string().as_deref(), Some("signed-in-session"));

        h.manager.start().unwrap();
        assert!(wait_for(|| listening(&h)));
        h.manager.stop();
    }

    /// Creates a fresh fake per connection, unauthorized without a session
    #[derive(Default)]
    struct SessionFactory {
        created: Mutex<Vec<(Role, SessionIdentity, Arc<FakeTransport>)>>,
    }

    impl TransportFactory for SessionFactory {
        fn create(&self, role: Role, session: &SessionIdentity) -> Arc<dyn Transport> {
            let transport = match session {
                SessionIdentity::Fresh => FakeTransport::unauthorized(),
                _ => FakeTransport::new(),
            };
            self.created.lock().push((role, session.clone(), Arc::clone(&transport)));
            transport
        }
    }

    #[test]
    fn test_sign_in_session_used_by_listener() {
        let factory = Arc::new(SessionFactory::default());
        let manager = ConnectionManager::new(config(), factory.clone(), Arc::new(MemoryAuditStore::new()));
        let statuses = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&statuses);
        manager.set_callbacks(Callbacks::default().on_status(move |status| sink.lock().push(status)));

        manager.request_code("+390000000").unwrap();
        manager.sign_in("+390000000", "12345", None).unwrap();
        let auth = Arc::clone(&factory.created.lock()[0].2);
        assert!(!auth.is_connected());
        assert_eq!(manager.session_string().as_deref(), Some("signed-in-session"));

        manager.start().unwrap();
        assert!(wait_for(|| statuses.lock().contains(&ConnectionStatus::Listening)));
        assert!(!statuses.lock().contains(&ConnectionStatus::AuthRequired));

        let created = factory.created.lock().clone();
        assert_eq!(created.len(), 2);
        assert_eq!(created[0].1, SessionIdentity::Fresh);
        assert_eq!(
            (created[1].0, created[1].1.clone()),
            (Role::Listener, SessionIdentity::Token("signed-in-session".to_string()))
        );
        // Only the listener holds a connection
        assert_eq!(created.iter().filter(|(_, _, t)| t.is_connected()).count(), 1);
        manager.stop();
    }

    #[test]
    fn test_unfinished_login_closed_on_start() {
        let factory = Arc::new(SessionFactory::default());
        let manager = ConnectionManager::new(config(), factory.clone(), Arc::new(MemoryAuditStore::new()));

        manager.request_code("+390000000").unwrap();
        let auth = Arc::clone(&factory.created.lock()[0].2);
        assert!(auth.is_connected());

        manager.start().unwrap();
        assert!(!auth.is_connected());
        assert!(wait_for(|| !manager.is_running()));
    }

    #[test]
    fn test_available_dialogs() {
        let h = harness();
        assert!(matches!(h.manager.available_dialogs(), Err(BotError::NotConnected)));

        h.factory.listener.set_dialogs(vec![Dialog {
            id: -100123,
            name: "Signals".to_string(),
            kind: DialogKind::Channel,
        }]);
        h.manager.start().unwrap();
        assert!(wait_for(|| listening(&h)));

        let dialogs = h.manager.available_dialogs().unwrap();
        assert_eq!(dialogs.len(), 1);
        assert_eq!(dialogs[0].name, "Signals");
        h.manager.stop();
    }

    #[test]
    fn test_custom_rules_loaded_on_start() {
        let mut store = MockRuleStore::new();
        store
            .expect_enabled_rules()
            .returning(|| Ok(vec![PatternRule::new("ht", r"\bprimo\s+tempo\s+x\b", "HALF_TIME")]));

        let factory = FakeFactory::new(FakeTransport::new(), FakeTransport::new());
        let manager = ConnectionManager::new(config(), factory.clone(), Arc::new(MemoryAuditStore::new()))
            .with_rule_store(Arc::new(store));
        let signals = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&signals);
        manager.set_callbacks(Callbacks::default().on_signal(move |s| sink.lock().push(s)));

        assert_eq!(manager.reload_custom_rules().unwrap(), 1);
        manager.start().unwrap();
        factory.listener.inject(1, 1, "🆚 A v B\nprimo tempo X @ 2.1");
        assert!(wait_for(|| !signals.lock().is_empty()));
        assert!(matches!(
            signals.lock()[0].kind,
            SignalKind::Market(ref m) if m.market_type == MarketType::HalfTime
        ));
        manager.stop();
    }
}
