use super::message::{topic_matches, TelemetryMessage, Topics};
use crate::config::{CloudConfig, TelemetryConfig};
use crate::error::TelemetryError;
use crate::store::BrokerSettings;
use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS, TlsConfiguration, Transport};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Identity of the shared cloud broker connection
pub const CLOUD_IDENTITY: &str = "cloud";

/// Receives decoded motion telemetry from every local connection
pub trait TelemetrySink: Send + Sync {
    fn dispatch(&self, message: TelemetryMessage);
}

/// Handler for raw publishes matching a subscription
pub trait TopicHandler: Send + Sync {
    fn handle(&self, topic: &str, payload: &[u8]);
}

/// Something commands can be published through
#[async_trait]
pub trait CommandPublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), TelemetryError>;
}

/// PEM files for a mutually authenticated TLS session
#[derive(Debug, Clone)]
pub struct TlsFiles {
    pub ca_path: String,
    pub cert_path: String,
    pub key_path: String,
}

impl TlsFiles {
    fn load(&self) -> Result<TlsConfiguration, TelemetryError> {
        let read = |path: &str| {
            std::fs::read(path).map_err(|source| TelemetryError::TlsMaterial {
                path: path.to_string(),
                source,
            })
        };

        Ok(TlsConfiguration::Simple {
            ca: read(&self.ca_path)?,
            alpn: None,
            client_auth: Some((read(&self.cert_path)?, read(&self.key_path)?)),
        })
    }
}

/// Everything needed to open one broker connection
#[derive(Debug, Clone)]
pub struct BrokerCredentials {
    /// Registry key; one live connection per identity
    pub identity: String,
    pub client_id: String,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub tls: Option<TlsFiles>,
    pub keep_alive: Duration,
}

impl BrokerCredentials {
    /// Local broker credentials scoped to one owner
    pub fn for_owner(owner_id: &str, broker: &BrokerSettings, config: &TelemetryConfig) -> Self {
        Self {
            identity: format!("owner:{}", owner_id),
            client_id: format!("{}-{}", config.client_id_prefix, owner_id),
            host: broker.host.clone(),
            port: broker.port,
            username: broker.username.clone(),
            password: broker.password.clone(),
            tls: None,
            keep_alive: Duration::from_secs(config.keep_alive_seconds),
        }
    }

    pub fn for_cloud(cloud: &CloudConfig, config: &TelemetryConfig) -> Self {
        Self {
            identity: CLOUD_IDENTITY.to_string(),
            client_id: cloud.client_id.clone(),
            host: cloud.endpoint.clone(),
            port: cloud.port,
            username: None,
            password: None,
            tls: Some(TlsFiles {
                ca_path: cloud.ca_path.clone(),
                cert_path: cloud.cert_path.clone(),
                key_path: cloud.key_path.clone(),
            }),
            keep_alive: Duration::from_secs(config.keep_alive_seconds),
        }
    }

    fn mqtt_options(&self) -> Result<MqttOptions, TelemetryError> {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(true);

        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            options.set_credentials(username, password);
        }

        if let Some(tls) = &self.tls {
            options.set_transport(Transport::Tls(tls.load()?));
        }

        Ok(options)
    }
}

#[derive(Clone)]
pub struct Subscription {
    pub pattern: String,
    pub qos: QoS,
    pub handler: Arc<dyn TopicHandler>,
}

/// One broker connection with its event loop task.
///
/// The connection never retries a failed publish. The underlying client
/// reconnects on its own and restores subscriptions on every ConnAck.
pub struct TelemetryConnection {
    identity: String,
    client: AsyncClient,
    connected: watch::Sender<bool>,
    subscriptions: Arc<Mutex<Vec<Subscription>>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TelemetryConnection {
    /// Start the client and its event loop; does not wait for the broker
    pub fn open(
        credentials: &BrokerCredentials,
        subscriptions: Vec<Subscription>,
    ) -> Result<Arc<Self>, TelemetryError> {
        let options = credentials.mqtt_options()?;
        let (client, mut eventloop) = AsyncClient::new(options, 10);
        let (connected, _) = watch::channel(false);

        let connection = Arc::new(Self {
            identity: credentials.identity.clone(),
            client,
            connected,
            subscriptions: Arc::new(Mutex::new(subscriptions)),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        });

        info!(
            "Opening broker connection '{}' to {}:{}",
            credentials.identity, credentials.host, credentials.port
        );

        let worker = Arc::downgrade(&connection);
        let cancel = connection.cancel.clone();
        let identity = credentials.identity.clone();

        let handle = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = eventloop.poll() => event,
                };

                let Some(connection) = worker.upgrade() else {
                    break;
                };

                match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("Broker connection '{}' established", identity);
                        connection.connected.send_replace(true);
                        connection.restore_subscriptions();
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        trace!("Received publish on {}", publish.topic);
                        connection.route(&publish.topic, &publish.payload);
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        warn!("Broker '{}' sent disconnect", identity);
                        connection.connected.send_replace(false);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        if connection.connected.send_replace(false) {
                            warn!("Broker connection '{}' lost: {}", identity, e);
                        } else {
                            debug!("Broker connection '{}' error: {}", identity, e);
                        }
                        drop(connection);
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                        }
                    }
                }
            }
            debug!("Event loop for '{}' stopped", identity);
        });

        *connection.task.lock() = Some(handle);
        Ok(connection)
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Wait until the broker has acknowledged the connection
    pub async fn wait_connected(&self, timeout: Duration) -> Result<(), TelemetryError> {
        let mut receiver = self.connected.subscribe();
        let acknowledged = tokio::time::timeout(timeout, receiver.wait_for(|connected| *connected))
            .await
            .map(|waited| waited.map(|_| ()));
        match acknowledged {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(TelemetryError::NotConnected {
                identity: self.identity.clone(),
            }),
            Err(_) => Err(TelemetryError::Connect {
                identity: self.identity.clone(),
                details: format!("no acknowledgement within {}s", timeout.as_secs()),
            }),
        }
    }

    /// Subscribe a handler to a topic pattern
    pub async fn subscribe(
        &self,
        pattern: &str,
        qos: QoS,
        handler: Arc<dyn TopicHandler>,
    ) -> Result<(), TelemetryError> {
        self.subscriptions.lock().push(Subscription {
            pattern: pattern.to_string(),
            qos,
            handler,
        });

        if self.is_connected() {
            self.client
                .subscribe(pattern, qos)
                .await
                .map_err(|e| TelemetryError::Subscribe {
                    pattern: pattern.to_string(),
                    details: e.to_string(),
                })?;
        }

        debug!("Subscribed '{}' to {}", self.identity, pattern);
        Ok(())
    }

    pub fn close(&self) {
        self.cancel.cancel();
        if let Err(e) = self.client.try_disconnect() {
            debug!("Disconnect of '{}' not delivered: {}", self.identity, e);
        }
        self.connected.send_replace(false);
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
    }

    fn restore_subscriptions(&self) {
        let subscriptions = self.subscriptions.lock().clone();
        for subscription in subscriptions {
            // The event loop drains the request queue, so this must not block
            if let Err(e) = self
                .client
                .try_subscribe(subscription.pattern.clone(), subscription.qos)
            {
                error!(
                    "Failed to subscribe '{}' to {}: {}",
                    self.identity, subscription.pattern, e
                );
            }
        }
    }

    fn route(&self, topic: &str, payload: &[u8]) {
        let handlers: Vec<Arc<dyn TopicHandler>> = self
            .subscriptions
            .lock()
            .iter()
            .filter(|subscription| topic_matches(&subscription.pattern, topic))
            .map(|subscription| Arc::clone(&subscription.handler))
            .collect();

        for handler in handlers {
            handler.handle(topic, payload);
        }
    }
}

#[async_trait]
impl CommandPublisher for TelemetryConnection {
    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), TelemetryError> {
        if !self.is_connected() {
            return Err(TelemetryError::NotConnected {
                identity: self.identity.clone(),
            });
        }

        self.client
            .publish(topic, qos, false, payload)
            .await
            .map_err(|e| TelemetryError::Publish {
                topic: topic.to_string(),
                details: e.to_string(),
            })?;

        debug!("Published to {} via '{}'", topic, self.identity);
        Ok(())
    }
}

impl Drop for TelemetryConnection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Decodes info-topic publishes and forwards them to the telemetry sink
pub struct InfoTopicHandler {
    topics: Topics,
    sink: Arc<dyn TelemetrySink>,
}

impl InfoTopicHandler {
    pub fn new(topics: Topics, sink: Arc<dyn TelemetrySink>) -> Self {
        Self { topics, sink }
    }
}

impl TopicHandler for InfoTopicHandler {
    fn handle(&self, topic: &str, payload: &[u8]) {
        match TelemetryMessage::from_publish(&self.topics, topic, payload) {
            Some(message) => {
                trace!(
                    "Telemetry from {}: moving={}",
                    message.address,
                    message.moving
                );
                self.sink.dispatch(message);
            }
            None => debug!("Ignoring undecodable telemetry on {}", topic),
        }
    }
}

/// Registry of broker connections keyed by identity
pub struct TelemetryBus {
    connections: Mutex<HashMap<String, Arc<TelemetryConnection>>>,
    sink: Arc<dyn TelemetrySink>,
    topics: Topics,
    config: TelemetryConfig,
    cloud: CloudConfig,
}

impl TelemetryBus {
    pub fn new(config: TelemetryConfig, cloud: CloudConfig, sink: Arc<dyn TelemetrySink>) -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            sink,
            topics: Topics::new(config.topic_prefix.clone()),
            config,
            cloud,
        }
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub fn cloud_enabled(&self) -> bool {
        self.cloud.enabled
    }

    /// Connect, reusing an existing connection for the same identity
    pub async fn connect(
        &self,
        credentials: &BrokerCredentials,
        subscriptions: Vec<Subscription>,
    ) -> Result<Arc<TelemetryConnection>, TelemetryError> {
        let connection = {
            let mut connections = self.connections.lock();
            match connections.get(&credentials.identity) {
                Some(existing) => Arc::clone(existing),
                None => {
                    let connection = TelemetryConnection::open(credentials, subscriptions)?;
                    connections.insert(credentials.identity.clone(), Arc::clone(&connection));
                    connection
                }
            }
        };

        if connection.is_connected() {
            return Ok(connection);
        }

        let timeout = Duration::from_secs(self.config.connect_timeout_seconds);
        if let Err(e) = connection.wait_connected(timeout).await {
            error!("Broker connection '{}' failed: {}", credentials.identity, e);
            self.evict(&credentials.identity, &connection);
            return Err(e);
        }

        Ok(connection)
    }

    /// Local connection for an owner, subscribed to device telemetry
    pub async fn local_connection(
        &self,
        owner_id: &str,
        broker: Option<BrokerSettings>,
    ) -> Result<Arc<TelemetryConnection>, TelemetryError> {
        let broker = broker.unwrap_or_else(|| BrokerSettings {
            host: self.config.default_broker_host.clone(),
            port: self.config.default_broker_port,
            username: None,
            password: None,
        });

        if broker.host.is_empty() {
            return Err(TelemetryError::MissingBrokerSettings {
                owner_id: owner_id.to_string(),
            });
        }

        let credentials = BrokerCredentials::for_owner(owner_id, &broker, &self.config);
        let handler: Arc<dyn TopicHandler> = Arc::new(InfoTopicHandler::new(
            self.topics.clone(),
            Arc::clone(&self.sink),
        ));

        let subscriptions = [self.topics.info_pattern(), self.topics.shared_info()]
            .into_iter()
            .map(|pattern| Subscription {
                pattern,
                qos: QoS::AtMostOnce,
                handler: Arc::clone(&handler),
            })
            .collect();

        self.connect(&credentials, subscriptions).await
    }

    /// Shared TLS connection to the cloud broker
    pub async fn cloud_connection(&self) -> Result<Arc<TelemetryConnection>, TelemetryError> {
        let credentials = BrokerCredentials::for_cloud(&self.cloud, &self.config);
        self.connect(&credentials, Vec::new()).await
    }

    pub fn connection(&self, identity: &str) -> Option<Arc<TelemetryConnection>> {
        self.connections.lock().get(identity).cloned()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    /// Close every connection
    pub fn shutdown(&self) {
        let connections: Vec<_> = self.connections.lock().drain().collect();
        for (identity, connection) in connections {
            debug!("Closing broker connection '{}'", identity);
            connection.close();
        }
    }

    fn evict(&self, identity: &str, connection: &Arc<TelemetryConnection>) {
        let mut connections = self.connections.lock();
        if connections
            .get(identity)
            .is_some_and(|current| Arc::ptr_eq(current, connection))
        {
            connections.remove(identity);
        }
        drop(connections);
        connection.close();
    }
}
