//! High level note client.
//!
//! Wires the device identity store, header builder, transport, and recovery
//! orchestrator together behind one handle. Every request primitive returns a
//! [`RequestOutcome`]; only construction can fail with [`NoteClientError`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;

use crate::challenges::core::{
	AccountContext, CaptchaChallenge, GameRole, HttpTransport, Region, ReqwestTransport,
	SolvedChallenge, TransportError,
};
use crate::challenges::outcome::RequestOutcome;
use crate::challenges::recovery::RiskControlOrchestrator;
use crate::config::{ClientConfig, ConfigError};
use crate::external_deps::captcha::{CaptchaProvider, GeetestAjaxProvider};
use crate::identity::{DeviceIdentityStore, KeyValueStore, MemoryStore, RedbStore, StoreError};
use crate::modules::events::{EventDispatcher, EventHandler, LoggingHandler};
use crate::modules::projection::project;
use crate::modules::snapshot::ResourceSnapshot;
use crate::signing::{HeaderBuilder, HeaderError};

/// Result alias used when building a client.
pub type NoteClientResult<T> = Result<T, NoteClientError>;

/// Construction-time failures.
#[derive(Debug, Error)]
pub enum NoteClientError {
	#[error("invalid configuration: {0}")]
	Config(#[from] ConfigError),
	#[error("identity store error: {0}")]
	Store(#[from] StoreError),
	#[error("header template error: {0}")]
	Header(#[from] HeaderError),
	#[error("transport initialisation failed: {0}")]
	Transport(#[from] TransportError),
}

enum StoreSource {
	Memory,
	Path(PathBuf),
	Custom(Arc<dyn KeyValueStore>),
}

pub struct NoteClientBuilder {
	config: ClientConfig,
	store: StoreSource,
	transport: Option<Arc<dyn HttpTransport>>,
	captcha_provider: Option<Arc<dyn CaptchaProvider>>,
	handlers: Vec<Arc<dyn EventHandler>>,
	enable_logging: bool,
}

impl NoteClientBuilder {
	pub fn new() -> Self {
		Self {
			config: ClientConfig::default(),
			store: StoreSource::Memory,
			transport: None,
			captcha_provider: None,
			handlers: Vec::new(),
			enable_logging: true,
		}
	}

	pub fn with_config(mut self, config: ClientConfig) -> Self {
		self.config = config;
		self
	}

	/// Use an existing key-value store for identity state.
	pub fn with_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
		self.store = StoreSource::Custom(store);
		self
	}

	/// Persist identity state in a redb database at `path`.
	pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
		self.store = StoreSource::Path(path.into());
		self
	}

	pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
		self.transport = Some(transport);
		self
	}

	pub fn with_captcha_provider(mut self, provider: Arc<dyn CaptchaProvider>) -> Self {
		self.captcha_provider = Some(provider);
		self
	}

	pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
		self.handlers.push(handler);
		self
	}

	/// Per-call deadline. Rounded up to whole seconds.
	pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
		let secs = timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0);
		self.config.request_timeout_secs = secs.max(1);
		self
	}

	pub fn disable_logging(mut self) -> Self {
		self.enable_logging = false;
		self
	}

	pub fn build(self) -> NoteClientResult<NoteClient> {
		NoteClient::with_builder(self)
	}
}

impl Default for NoteClientBuilder {
	fn default() -> Self {
		Self::new()
	}
}

/// Entry point for role lookups, note fetches, and risk-control recovery.
pub struct NoteClient {
	config: ClientConfig,
	orchestrator: RiskControlOrchestrator,
	transport: Arc<dyn HttpTransport>,
	headers: HeaderBuilder,
	captcha_provider: Arc<dyn CaptchaProvider>,
	events: Arc<EventDispatcher>,
}

impl NoteClient {
	/// Client with default configuration and in-memory identity state.
	pub fn new() -> NoteClientResult<Self> {
		NoteClientBuilder::new().build()
	}

	pub fn builder() -> NoteClientBuilder {
		NoteClientBuilder::new()
	}

	fn with_builder(builder: NoteClientBuilder) -> NoteClientResult<Self> {
		let NoteClientBuilder {
			config,
			store,
			transport,
			captcha_provider,
			handlers,
			enable_logging,
		} = builder;
		config.validate()?;

		let store: Arc<dyn KeyValueStore> = match store {
			StoreSource::Memory => Arc::new(MemoryStore::new()),
			StoreSource::Path(path) => Arc::new(RedbStore::open(path)?),
			StoreSource::Custom(store) => store,
		};
		let identity = DeviceIdentityStore::with_epoch(store, config.device_epoch.clone());
		identity.ensure_device_id()?;
		let headers = HeaderBuilder::new(identity, &config)?;

		let transport: Arc<dyn HttpTransport> = match transport {
			Some(transport) => transport,
			None => Arc::new(ReqwestTransport::new()?),
		};

		let mut dispatcher = EventDispatcher::new();
		if enable_logging {
			dispatcher.register_handler(Arc::new(LoggingHandler));
		}
		for handler in handlers {
			dispatcher.register_handler(handler);
		}
		let events = Arc::new(dispatcher);

		let captcha_provider: Arc<dyn CaptchaProvider> = match captcha_provider {
			Some(provider) => provider,
			None => Arc::new(GeetestAjaxProvider::new(
				transport.clone(),
				headers.clone(),
				config.captcha_url.clone(),
			)),
		};

		let orchestrator =
			RiskControlOrchestrator::new(transport.clone(), headers.clone(), &config, events.clone());

		Ok(Self {
			config,
			orchestrator,
			transport,
			headers,
			captcha_provider,
			events,
		})
	}

	pub fn config(&self) -> &ClientConfig {
		&self.config
	}

	pub fn identity(&self) -> &DeviceIdentityStore {
		self.headers.identity()
	}

	pub fn orchestrator(&self) -> &RiskControlOrchestrator {
		&self.orchestrator
	}

	pub fn events(&self) -> &EventDispatcher {
		&self.events
	}

	/// Emulated device id, minted on first use.
	pub fn device_id(&self) -> Result<String, StoreError> {
		self.identity().ensure_device_id()
	}

	/// Captcha provider used by [`NoteClient::recover`].
	pub fn captcha_provider(&self) -> Arc<dyn CaptchaProvider> {
		self.captcha_provider.clone()
	}

	/// Fresh GeeTest adapter sharing this client's transport and headers.
	pub fn geetest_provider(&self) -> GeetestAjaxProvider {
		GeetestAjaxProvider::new(
			self.transport.clone(),
			self.headers.clone(),
			self.config.captcha_url.clone(),
		)
	}

	pub async fn fetch_roles(&self, region: Region, cookie: &str) -> RequestOutcome<Vec<GameRole>> {
		self.orchestrator.fetch_roles(region, cookie).await
	}

	pub async fn fetch_resource_snapshot(
		&self,
		account: &AccountContext,
	) -> RequestOutcome<ResourceSnapshot> {
		self.orchestrator.fetch_resource_snapshot(account).await
	}

	pub async fn create_verification(
		&self,
		account: &AccountContext,
		force_fingerprint: bool,
	) -> RequestOutcome<CaptchaChallenge> {
		self.orchestrator
			.create_verification(account, force_fingerprint)
			.await
	}

	pub async fn solve_challenge(
		&self,
		account: &AccountContext,
		challenge: &CaptchaChallenge,
	) -> RequestOutcome<SolvedChallenge> {
		self.orchestrator
			.solve_challenge(self.captcha_provider.as_ref(), account, challenge)
			.await
	}

	pub async fn verify_verification(
		&self,
		account: &AccountContext,
		solved: &SolvedChallenge,
	) -> RequestOutcome<bool> {
		self.orchestrator.verify_verification(account, solved).await
	}

	/// One recovery pass with the configured captcha provider.
	pub async fn recover(&self, account: &AccountContext) -> RequestOutcome<()> {
		self.orchestrator
			.recover(account, self.captcha_provider.as_ref())
			.await
	}

	/// Note fetch with at most one recovery pass and one retry.
	pub async fn fetch_with_recovery(
		&self,
		account: &AccountContext,
	) -> RequestOutcome<ResourceSnapshot> {
		self.orchestrator
			.fetch_with_recovery(account, self.captcha_provider.as_ref())
			.await
	}

	/// Projects a fetched snapshot to the current time.
	pub fn project_now(&self, snapshot: &ResourceSnapshot) -> ResourceSnapshot {
		project(snapshot, Utc::now())
	}
}

impl std::fmt::Debug for NoteClient {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("NoteClient")
			.field("orchestrator", &self.orchestrator)
			.field("captcha_provider", &self.captcha_provider.name())
			.field("handlers", &self.events.handler_count())
			.finish_non_exhaustive()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Mutex;

	use crate::modules::events::NoteEvent;

	struct Recorder(Mutex<Vec<String>>);

	impl EventHandler for Recorder {
		fn handle(&self, event: &NoteEvent) {
			let label = match event {
				NoteEvent::PreRequest(_) => "pre",
				NoteEvent::PostResponse(_) => "post",
				NoteEvent::RiskControl(_) => "risk",
				NoteEvent::Verification(_) => "verification",
				NoteEvent::Error(_) => "error",
			};
			self.0.lock().unwrap().push(label.to_string());
		}
	}

	#[test]
	fn builder_applies_timeout_and_handlers() {
		let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
		let client = NoteClient::builder()
			.with_request_timeout(Duration::from_millis(2500))
			.with_event_handler(recorder)
			.build()
			.unwrap();
		assert_eq!(client.config().request_timeout_secs, 3);
		assert_eq!(client.orchestrator().deadline(), Duration::from_secs(3));
		assert_eq!(client.events().handler_count(), 2);
		assert_eq!(client.captcha_provider().name(), "geetest-ajax");
	}

	#[test]
	fn device_id_is_stable_across_calls() {
		let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
		let client = NoteClient::builder()
			.with_store(store.clone())
			.disable_logging()
			.build()
			.unwrap();
		let first = client.device_id().unwrap();
		assert_eq!(client.device_id().unwrap(), first);

		let rebuilt = NoteClient::builder().with_store(store).build().unwrap();
		assert_eq!(rebuilt.device_id().unwrap(), first);
	}

	#[test]
	fn invalid_config_is_rejected() {
		let mut config = ClientConfig::default();
		config.request_timeout_secs = 0;
		let err = NoteClient::builder().with_config(config).build().unwrap_err();
		assert!(matches!(err, NoteClientError::Config(_)));
	}
}
