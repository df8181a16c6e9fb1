//! Risk-control recovery.
//!
//! The note endpoint answers automated-looking traffic with retcode `1034`.
//! Recovery is a fixed sequence of remote steps: refresh the device
//! fingerprint (domestic only), request a challenge, hand it to a captcha
//! provider, post the solution back, and store the single-use token the
//! platform returns. The next note fetch for that account consumes the token.
//!
//! Every primitive returns a [`RequestOutcome`]. Nothing here loops: a failed
//! step short-circuits the pass and the caller decides what to do next.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use http::HeaderMap;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex as AsyncMutex;

use super::core::{
    AccountContext, ApiEnvelope, CaptchaChallenge, GameRole, HttpTransport, RISK_CONTROL_RETCODE,
    Region, SignedRequest, SolvedChallenge, TransportError, execute_with_deadline, types::RoleList,
};
use super::outcome::{CaptchaFailure, OutcomeError, RequestOutcome};
use crate::config::{ClientConfig, Endpoints};
use crate::external_deps::captcha::{CaptchaProvider, CaptchaTask};
use crate::identity::{DeviceFingerprint, DeviceIdentityStore, FingerprintIssuer};
use crate::modules::events::{
    ErrorEvent, EventDispatcher, NoteEvent, PostResponseEvent, PreRequestEvent, RiskControlEvent,
    VerificationEvent,
};
use crate::modules::snapshot::{DailyNote, ResourceSnapshot};
use crate::signing::{HeaderBuilder, body_string, headers::insert_header};

const DEVICE_FP_HEADER: &str = "x-rpc-device_fp";
// Remote spelling.
const CHALLENGE_TOKEN_HEADER: &str = "x-rpc-chellange";
const CHALLENGE_PATH_HEADER: &str = "x-rpc-challenge_path";
const CHALLENGE_GAME_HEADER: &str = "x-rpc-challenge_game";
const CHALLENGE_TRACE_HEADER: &str = "x-rpc-challenge_trace";
const TRACE_ID_HEADER: &str = "x-trace-id";

/// Stages of a fetch that may need risk-control recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecoveryStage {
    Idle,
    Requesting,
    Success,
    ProtocolError,
    RiskControlDetected,
    FingerprintRefresh,
    ChallengeCreate,
    ChallengeSolve,
    ChallengeVerify,
    Retry,
    Failed,
}

/// How the work done in a stage ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageResult {
    Completed,
    RiskControl,
    Failed,
}

impl RecoveryStage {
    /// Allowed transitions. Terminal stages map to themselves.
    pub fn next(self, result: StageResult) -> RecoveryStage {
        use RecoveryStage::*;
        match (self, result) {
            (Idle, _) => Requesting,
            (Requesting, StageResult::Completed) => Success,
            (Requesting, StageResult::RiskControl) => RiskControlDetected,
            (Requesting, StageResult::Failed) => ProtocolError,
            (RiskControlDetected, _) => FingerprintRefresh,
            (FingerprintRefresh, StageResult::Completed) => ChallengeCreate,
            (ChallengeCreate, StageResult::Completed) => ChallengeSolve,
            (ChallengeSolve, StageResult::Completed) => ChallengeVerify,
            (ChallengeVerify, StageResult::Completed) => Retry,
            (Retry, StageResult::Completed) => Success,
            (FingerprintRefresh | ChallengeCreate | ChallengeSolve | ChallengeVerify | Retry, _) => {
                Failed
            }
            (terminal @ (Success | ProtocolError | Failed), _) => terminal,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RecoveryStage::Success | RecoveryStage::ProtocolError | RecoveryStage::Failed
        )
    }
}

#[derive(Debug, Deserialize)]
struct VerifyData {
    challenge: String,
}

struct Exchange {
    envelope: Result<ApiEnvelope, TransportError>,
    trace_id: Option<String>,
}

/// Issues note requests and drives the challenge flow for them.
pub struct RiskControlOrchestrator {
    transport: Arc<dyn HttpTransport>,
    headers: HeaderBuilder,
    fingerprints: FingerprintIssuer,
    domestic: Endpoints,
    overseas: Endpoints,
    challenge_path: String,
    challenge_game: String,
    events: Arc<EventDispatcher>,
    deadline: Duration,
    // One entry per role id ever seen, never evicted. Sized for a handful of accounts.
    account_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl RiskControlOrchestrator {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        headers: HeaderBuilder,
        config: &ClientConfig,
        events: Arc<EventDispatcher>,
    ) -> Self {
        let deadline = config.request_timeout();
        let fingerprints = FingerprintIssuer::new(
            transport.clone(),
            headers.clone(),
            config.fingerprint_url.clone(),
            config.telemetry.clone(),
            deadline,
        );
        Self {
            transport,
            headers,
            fingerprints,
            domestic: config.domestic.endpoints.clone(),
            overseas: config.overseas.endpoints.clone(),
            challenge_path: config.challenge_path.clone(),
            challenge_game: config.challenge_game.clone(),
            events,
            deadline,
            account_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn identity(&self) -> &DeviceIdentityStore {
        self.headers.identity()
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Lists the roles bound to a session cookie. Unsigned.
    pub async fn fetch_roles(&self, region: Region, cookie: &str) -> RequestOutcome<Vec<GameRole>> {
        self.roles(region, cookie).await.into()
    }

    /// Fetches the daily note for `account`.
    pub async fn fetch_resource_snapshot(
        &self,
        account: &AccountContext,
    ) -> RequestOutcome<ResourceSnapshot> {
        let lock = self.account_lock(&account.role_id);
        let _guard = lock.lock().await;
        self.note(account).await.into()
    }

    /// Requests a captcha challenge. `force_fingerprint` reissues the
    /// domestic device fingerprint first.
    pub async fn create_verification(
        &self,
        account: &AccountContext,
        force_fingerprint: bool,
    ) -> RequestOutcome<CaptchaChallenge> {
        let lock = self.account_lock(&account.role_id);
        let _guard = lock.lock().await;
        self.create(account, force_fingerprint).await.into()
    }

    pub async fn solve_challenge(
        &self,
        provider: &dyn CaptchaProvider,
        account: &AccountContext,
        challenge: &CaptchaChallenge,
    ) -> RequestOutcome<SolvedChallenge> {
        self.solve(provider, account, challenge).await.into()
    }

    /// Posts a solved challenge. On success the returned token is stored for
    /// the next note fetch.
    pub async fn verify_verification(
        &self,
        account: &AccountContext,
        solved: &SolvedChallenge,
    ) -> RequestOutcome<bool> {
        let lock = self.account_lock(&account.role_id);
        let _guard = lock.lock().await;
        self.verify(account, solved).await.into()
    }

    /// One recovery pass: fingerprint refresh (domestic), create, solve,
    /// verify. Does not fetch the note again.
    pub async fn recover(
        &self,
        account: &AccountContext,
        provider: &dyn CaptchaProvider,
    ) -> RequestOutcome<()> {
        let lock = self.account_lock(&account.role_id);
        let _guard = lock.lock().await;
        self.recover_once(account, provider).await.into()
    }

    /// Fetches the note, running one recovery pass and a single retry when the
    /// first attempt hits risk control.
    pub async fn fetch_with_recovery(
        &self,
        account: &AccountContext,
        provider: &dyn CaptchaProvider,
    ) -> RequestOutcome<ResourceSnapshot> {
        let lock = self.account_lock(&account.role_id);
        let _guard = lock.lock().await;

        match self.note(account).await {
            Err(OutcomeError::RiskControl) => {}
            other => return other.into(),
        }
        if let Err(err) = self.recover_once(account, provider).await {
            return err.into();
        }

        let retried = self.note(account).await;
        let result = match &retried {
            Ok(_) => RecoveryStage::Retry.next(StageResult::Completed),
            Err(OutcomeError::RiskControl) => RecoveryStage::Retry.next(StageResult::RiskControl),
            Err(_) => RecoveryStage::Retry.next(StageResult::Failed),
        };
        log::info!("retry for account {} ended in {:?}", account.role_id, result);
        retried.into()
    }

    fn account_lock(&self, account: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self
            .account_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        locks.entry(account.to_string()).or_default().clone()
    }

    fn endpoints(&self, region: Region) -> &Endpoints {
        match region {
            Region::Domestic => &self.domestic,
            Region::Overseas => &self.overseas,
        }
    }

    async fn roles(&self, region: Region, cookie: &str) -> Result<Vec<GameRole>, OutcomeError> {
        let params: [(&str, &str); 0] = [];
        let mut headers = self.headers.build_headers(region, &params, None, false)?;
        insert_header(&mut headers, "cookie", cookie)?;

        let request = SignedRequest::get(self.endpoints(region).roles.clone(), headers);
        let exchange = self.exchange("-", &request, false).await?;
        let envelope = ensure_success(exchange.envelope?)?;
        let roles: RoleList = envelope.decode_data().map_err(decode_error)?;
        Ok(roles.list)
    }

    async fn note(&self, account: &AccountContext) -> Result<ResourceSnapshot, OutcomeError> {
        let region = account.region();
        let role_id = account.role_id.as_str();
        let params = [("server", account.server.as_str()), ("role_id", role_id)];

        let mut url = self.endpoints(region).note.clone();
        url.query_pairs_mut().extend_pairs(params.iter());

        let mut headers = self.headers.build_headers(region, &params, None, true)?;
        let cookie = if region.is_domestic() {
            self.attach_fingerprint(&mut headers, account, false)
                .await?
                .cookie_with(&account.cookie)
        } else {
            account.cookie.clone()
        };
        if let Some(token) = self.identity().take_challenge_token(role_id)? {
            insert_header(&mut headers, CHALLENGE_TOKEN_HEADER, &token)?;
        }
        insert_header(&mut headers, "cookie", &cookie)?;

        let request = SignedRequest::get(url, headers);
        let exchange = self.exchange(role_id, &request, true).await?;
        self.identity()
            .record_trace_id(role_id, exchange.trace_id.as_deref())?;

        let envelope = exchange.envelope?;
        match envelope.retcode {
            0 => {
                let note: DailyNote = envelope.decode_data().map_err(decode_error)?;
                Ok(ResourceSnapshot::new(note, Utc::now()))
            }
            RISK_CONTROL_RETCODE => {
                self.events.dispatch(NoteEvent::RiskControl(RiskControlEvent {
                    account: role_id.to_string(),
                    trace_id: exchange.trace_id,
                    timestamp: Utc::now(),
                }));
                Err(OutcomeError::RiskControl)
            }
            code => {
                log::warn!(
                    "note request for account {role_id} failed with code {code}: {}",
                    envelope.message
                );
                self.identity().request_fingerprint_refresh(role_id)?;
                Err(OutcomeError::Protocol {
                    code,
                    message: envelope.message,
                })
            }
        }
    }

    async fn create(
        &self,
        account: &AccountContext,
        force_fingerprint: bool,
    ) -> Result<CaptchaChallenge, OutcomeError> {
        let region = account.region();
        let params = [("is_high", "true")];

        let mut url = self.endpoints(region).create_verification.clone();
        url.query_pairs_mut().extend_pairs(params.iter());

        let mut headers = self.headers.build_headers(region, &params, None, true)?;
        self.insert_challenge_headers(&mut headers, &account.role_id)?;
        if region.is_domestic() {
            self.attach_fingerprint(&mut headers, account, force_fingerprint)
                .await?;
        }
        insert_header(&mut headers, "cookie", &account.cookie)?;

        let request = SignedRequest::get(url, headers);
        let envelope = self.exchange(&account.role_id, &request, true).await?.envelope?;
        if !envelope.is_success() {
            return Err(CaptchaFailure::CreateRejected {
                code: envelope.retcode,
                message: envelope.message,
            }
            .into());
        }
        envelope.decode_data().map_err(decode_error)
    }

    async fn solve(
        &self,
        provider: &dyn CaptchaProvider,
        account: &AccountContext,
        challenge: &CaptchaChallenge,
    ) -> Result<SolvedChallenge, OutcomeError> {
        let task = CaptchaTask::from_challenge(challenge, account.region());
        log::debug!(
            "solving challenge for account {} with {}",
            account.role_id,
            provider.name()
        );
        let solution = provider.solve(&task).await.map_err(CaptchaFailure::Solve)?;
        Ok(solution.into_solved())
    }

    async fn verify(
        &self,
        account: &AccountContext,
        solved: &SolvedChallenge,
    ) -> Result<bool, OutcomeError> {
        let region = account.region();
        let body = json!({
            "geetest_challenge": solved.geetest_challenge,
            "geetest_seccode": solved.geetest_seccode,
            "geetest_validate": solved.geetest_validate,
        });
        let params: [(&str, &str); 0] = [];

        let mut headers = self
            .headers
            .build_headers(region, &params, Some(&body), true)?;
        self.insert_challenge_headers(&mut headers, &account.role_id)?;
        insert_header(&mut headers, "cookie", &account.cookie)?;

        let request = SignedRequest::post(
            self.endpoints(region).verify_verification.clone(),
            headers,
            body_string(Some(&body)),
        );
        let envelope = self.exchange(&account.role_id, &request, true).await?.envelope?;
        if !envelope.is_success() {
            return Err(CaptchaFailure::VerifyRejected {
                code: envelope.retcode,
                message: envelope.message,
            }
            .into());
        }
        let data: VerifyData = envelope.decode_data().map_err(decode_error)?;
        self.identity()
            .store_challenge_token(&account.role_id, &data.challenge)?;
        Ok(true)
    }

    async fn recover_once(
        &self,
        account: &AccountContext,
        provider: &dyn CaptchaProvider,
    ) -> Result<(), OutcomeError> {
        let mut stage = RecoveryStage::RiskControlDetected.next(StageResult::Completed);

        if account.region().is_domestic() {
            let refreshed = self
                .fingerprints
                .get_or_refresh(&account.role_id, &account.cookie, true)
                .await
                .map(|_| ())
                .map_err(OutcomeError::from);
            self.advance_with(account, &mut stage, refreshed)?;
        } else {
            stage = stage.next(StageResult::Completed);
        }

        let challenge = self.create(account, false).await;
        let challenge = self.advance_with(account, &mut stage, challenge)?;

        let solved = self.solve(provider, account, &challenge).await;
        let solved = self.advance_with(account, &mut stage, solved)?;

        let verified = self.verify(account, &solved).await;
        self.advance_with(account, &mut stage, verified)?;

        debug_assert_eq!(stage, RecoveryStage::Retry);
        Ok(())
    }

    fn advance_with<T>(
        &self,
        account: &AccountContext,
        stage: &mut RecoveryStage,
        result: Result<T, OutcomeError>,
    ) -> Result<T, OutcomeError> {
        let current = *stage;
        let (step, detail) = match &result {
            Ok(_) => (StageResult::Completed, None),
            Err(err) => (StageResult::Failed, Some(err.to_string())),
        };
        self.events.dispatch(NoteEvent::Verification(VerificationEvent {
            account: account.role_id.clone(),
            stage: current,
            success: step == StageResult::Completed,
            detail,
            timestamp: Utc::now(),
        }));
        *stage = current.next(step);
        result
    }

    async fn attach_fingerprint(
        &self,
        headers: &mut HeaderMap,
        account: &AccountContext,
        force_refresh: bool,
    ) -> Result<DeviceFingerprint, OutcomeError> {
        let fingerprint = self
            .fingerprints
            .get_or_refresh(&account.role_id, &account.cookie, force_refresh)
            .await?;
        insert_header(headers, DEVICE_FP_HEADER, &fingerprint.device_fp)?;
        Ok(fingerprint)
    }

    fn insert_challenge_headers(
        &self,
        headers: &mut HeaderMap,
        account: &str,
    ) -> Result<(), OutcomeError> {
        insert_header(headers, CHALLENGE_PATH_HEADER, &self.challenge_path)?;
        insert_header(headers, CHALLENGE_GAME_HEADER, &self.challenge_game)?;
        if let Some(trace_id) = self.identity().trace_id(account)? {
            insert_header(headers, CHALLENGE_TRACE_HEADER, &trace_id)?;
        }
        Ok(())
    }

    async fn exchange(
        &self,
        account: &str,
        request: &SignedRequest,
        signed: bool,
    ) -> Result<Exchange, TransportError> {
        self.events.dispatch(NoteEvent::PreRequest(PreRequestEvent {
            account: account.to_string(),
            url: request.url.clone(),
            method: request.method.clone(),
            signed,
            timestamp: Utc::now(),
        }));

        let started = Instant::now();
        let response = execute_with_deadline(self.transport.as_ref(), request, self.deadline).await;
        let response = match response {
            Ok(response) => response,
            Err(err) => {
                self.events.dispatch(NoteEvent::Error(ErrorEvent {
                    account: account.to_string(),
                    error: err.to_string(),
                    timestamp: Utc::now(),
                }));
                return Err(err);
            }
        };

        let envelope = response.json::<ApiEnvelope>();
        self.events.dispatch(NoteEvent::PostResponse(PostResponseEvent {
            account: account.to_string(),
            url: request.url.clone(),
            method: request.method.clone(),
            status: response.status,
            retcode: envelope.as_ref().ok().map(|envelope| envelope.retcode),
            latency: started.elapsed(),
            timestamp: Utc::now(),
        }));

        Ok(Exchange {
            envelope,
            trace_id: response
                .header(TRACE_ID_HEADER)
                .filter(|value| !value.is_empty())
                .map(str::to_string),
        })
    }
}

impl std::fmt::Debug for RiskControlOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RiskControlOrchestrator")
            .field("deadline", &self.deadline)
            .field("challenge_path", &self.challenge_path)
            .finish_non_exhaustive()
    }
}

fn ensure_success(envelope: ApiEnvelope) -> Result<ApiEnvelope, OutcomeError> {
    match envelope.retcode {
        0 => Ok(envelope),
        RISK_CONTROL_RETCODE => Err(OutcomeError::RiskControl),
        code => Err(OutcomeError::Protocol {
            code,
            message: envelope.message,
        }),
    }
}

fn decode_error(err: serde_json::Error) -> OutcomeError {
    OutcomeError::Network(TransportError::Decode(err.to_string()))
}
