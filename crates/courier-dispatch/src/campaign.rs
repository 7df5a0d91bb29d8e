//! Campaign storage and rate-limited fan-out.
//!
//! The store holds campaign records and their monotone counters; the
//! runner expands a campaign's recipient list into dispatch requests at
//! the campaign's rate cap. The cursor is persisted after every attempted
//! recipient so pause/resume continues from the first not-yet-attempted
//! one.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, RwLock},
    time::Duration,
};

use courier_core::{
    Campaign, CampaignId, CampaignStatus, Clock, CoreError, Result, TenantId,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::dispatcher::{Dispatcher, SendRequest};

/// In-memory campaign store.
#[derive(Debug)]
pub struct CampaignStore {
    campaigns: RwLock<HashMap<CampaignId, Campaign>>,
    clock: Arc<dyn Clock>,
}

impl CampaignStore {
    /// Creates an empty store.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { campaigns: RwLock::new(HashMap::new()), clock }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<CampaignId, Campaign>> {
        self.campaigns.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<CampaignId, Campaign>> {
        self.campaigns.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Stores a new campaign, initialising its counters.
    pub fn create(&self, mut campaign: Campaign) -> Campaign {
        campaign.stats.total_recipients = campaign.recipients.len() as u64;
        self.write().insert(campaign.id, campaign.clone());
        campaign
    }

    /// Fetches a tenant's campaign.
    pub fn get(&self, tenant_id: TenantId, id: CampaignId) -> Result<Campaign> {
        self.read()
            .get(&id)
            .filter(|c| c.tenant_id == tenant_id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("campaign {id}")))
    }

    /// All campaigns belonging to a tenant.
    pub fn list(&self, tenant_id: TenantId) -> Vec<Campaign> {
        let mut owned: Vec<Campaign> =
            self.read().values().filter(|c| c.tenant_id == tenant_id).cloned().collect();
        owned.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        owned
    }

    /// Deletes a campaign that is not currently running.
    pub fn delete(&self, tenant_id: TenantId, id: CampaignId) -> Result<()> {
        let mut campaigns = self.write();
        match campaigns.get(&id) {
            Some(c) if c.tenant_id != tenant_id => {
                Err(CoreError::NotFound(format!("campaign {id}")))
            },
            Some(c) if c.status == CampaignStatus::Running => {
                Err(CoreError::Conflict("campaign is running, pause or cancel first".into()))
            },
            Some(_) => {
                campaigns.remove(&id);
                Ok(())
            },
            None => Err(CoreError::NotFound(format!("campaign {id}"))),
        }
    }

    /// Replaces a campaign's definition. Only draft and scheduled
    /// campaigns can be edited: anything later has a cursor and counters
    /// the new recipient list would corrupt.
    pub fn update(&self, mut campaign: Campaign) -> Result<Campaign> {
        let mut campaigns = self.write();
        let existing = campaigns
            .get(&campaign.id)
            .filter(|c| c.tenant_id == campaign.tenant_id)
            .ok_or_else(|| CoreError::NotFound(format!("campaign {}", campaign.id)))?;
        if !matches!(existing.status, CampaignStatus::Draft | CampaignStatus::Scheduled) {
            return Err(CoreError::Conflict(format!(
                "campaign is {}, only draft or scheduled campaigns can be edited",
                existing.status
            )));
        }
        campaign.created_at = existing.created_at;
        campaign.stats.total_recipients = campaign.recipients.len() as u64;
        campaigns.insert(campaign.id, campaign.clone());
        Ok(campaign)
    }

    fn transition(
        &self,
        tenant_id: TenantId,
        id: CampaignId,
        allowed_from: &[CampaignStatus],
        to: CampaignStatus,
    ) -> Result<Campaign> {
        let mut campaigns = self.write();
        let campaign = campaigns
            .get_mut(&id)
            .filter(|c| c.tenant_id == tenant_id)
            .ok_or_else(|| CoreError::NotFound(format!("campaign {id}")))?;

        if !allowed_from.contains(&campaign.status) {
            return Err(CoreError::Conflict(format!(
                "cannot move campaign from {} to {to}",
                campaign.status
            )));
        }

        campaign.status = to;
        match to {
            CampaignStatus::Running if campaign.started_at.is_none() => {
                campaign.started_at = Some(self.clock.now_utc());
            },
            CampaignStatus::Completed | CampaignStatus::Cancelled => {
                campaign.completed_at = Some(self.clock.now_utc());
            },
            _ => {},
        }
        Ok(campaign.clone())
    }

    /// `draft|scheduled|paused -> running`.
    pub fn mark_running(&self, tenant_id: TenantId, id: CampaignId) -> Result<Campaign> {
        self.transition(
            tenant_id,
            id,
            &[CampaignStatus::Draft, CampaignStatus::Scheduled, CampaignStatus::Paused],
            CampaignStatus::Running,
        )
    }

    /// `running -> paused`. In-flight sends complete; emission stops.
    pub fn mark_paused(&self, tenant_id: TenantId, id: CampaignId) -> Result<Campaign> {
        self.transition(tenant_id, id, &[CampaignStatus::Running], CampaignStatus::Paused)
    }

    /// Any non-terminal state to `cancelled`. Terminal.
    pub fn mark_cancelled(&self, tenant_id: TenantId, id: CampaignId) -> Result<Campaign> {
        self.transition(
            tenant_id,
            id,
            &[
                CampaignStatus::Draft,
                CampaignStatus::Scheduled,
                CampaignStatus::Running,
                CampaignStatus::Paused,
            ],
            CampaignStatus::Cancelled,
        )
    }

    /// Whether the campaign has been cancelled. Unknown ids count as
    /// cancelled so orphaned queue entries are not sent.
    pub fn is_cancelled(&self, id: CampaignId) -> bool {
        self.read().get(&id).map_or(true, |c| c.status == CampaignStatus::Cancelled)
    }

    fn with_campaign(&self, id: CampaignId, f: impl FnOnce(&mut Campaign)) {
        let mut campaigns = self.write();
        match campaigns.get_mut(&id) {
            Some(campaign) => f(campaign),
            None => warn!(campaign_id = %id, "counter update for unknown campaign"),
        }
    }

    pub(crate) fn advance_cursor(&self, id: CampaignId, cursor: usize) {
        self.with_campaign(id, |c| c.cursor = c.cursor.max(cursor));
    }

    pub(crate) fn mark_completed(&self, id: CampaignId) {
        self.with_campaign(id, |c| {
            if c.status == CampaignStatus::Running {
                c.status = CampaignStatus::Completed;
                c.completed_at = Some(self.clock.now_utc());
            }
        });
    }

    /// Counts an acknowledged send and its cost.
    pub fn record_sent(&self, id: CampaignId, cost: f64) {
        self.with_campaign(id, |c| {
            c.stats.sent += 1;
            c.stats.total_cost += cost;
        });
    }

    /// Counts a confirmed delivery.
    pub fn record_delivered(&self, id: CampaignId) {
        self.with_campaign(id, |c| c.stats.delivered += 1);
    }

    /// Counts a read receipt.
    pub fn record_read(&self, id: CampaignId) {
        self.with_campaign(id, |c| c.stats.read += 1);
    }

    /// Counts a terminal failure.
    pub fn record_failed(&self, id: CampaignId) {
        self.with_campaign(id, |c| c.stats.failed += 1);
    }
}

/// Expands campaigns into dispatch requests at their rate cap.
#[derive(Clone)]
pub struct CampaignRunner {
    dispatcher: Dispatcher,
    store: Arc<CampaignStore>,
    clock: Arc<dyn Clock>,
    running: Arc<Mutex<HashMap<CampaignId, CancellationToken>>>,
}

impl std::fmt::Debug for CampaignRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CampaignRunner").finish_non_exhaustive()
    }
}

impl CampaignRunner {
    /// Creates a runner emitting through `dispatcher`.
    pub fn new(dispatcher: Dispatcher, store: Arc<CampaignStore>, clock: Arc<dyn Clock>) -> Self {
        Self { dispatcher, store, clock, running: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Starts (or resumes) a campaign and spawns its emission task.
    pub fn start(&self, tenant_id: TenantId, id: CampaignId) -> Result<Campaign> {
        let campaign = self.store.mark_running(tenant_id, id)?;

        let token = CancellationToken::new();
        {
            let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(previous) = running.insert(id, token.clone()) {
                previous.cancel();
            }
        }

        let runner = self.clone();
        tokio::spawn(async move {
            runner.run(id, token).await;
        });
        info!(campaign_id = %id, "campaign running");
        Ok(campaign)
    }

    /// Stops emission, keeping the cursor for resume. In-flight sends
    /// complete normally.
    pub fn pause(&self, tenant_id: TenantId, id: CampaignId) -> Result<Campaign> {
        let campaign = self.store.mark_paused(tenant_id, id)?;
        self.stop_task(id);
        Ok(campaign)
    }

    /// Terminally stops the campaign. Pending recipients are not attempted.
    pub fn cancel(&self, tenant_id: TenantId, id: CampaignId) -> Result<Campaign> {
        let campaign = self.store.mark_cancelled(tenant_id, id)?;
        self.stop_task(id);
        Ok(campaign)
    }

    fn stop_task(&self, id: CampaignId) {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(token) = running.remove(&id) {
            token.cancel();
        }
    }

    async fn run(&self, id: CampaignId, token: CancellationToken) {
        loop {
            if token.is_cancelled() {
                return;
            }

            // Fresh snapshot each window: pause/cancel must stop emission.
            let campaign = {
                let campaigns = self.store.read();
                match campaigns.get(&id) {
                    Some(c) if c.status == CampaignStatus::Running => c.clone(),
                    _ => return,
                }
            };

            if campaign.cursor >= campaign.recipients.len() {
                self.store.mark_completed(id);
                info!(campaign_id = %id, "campaign completed");
                return;
            }

            let window_end =
                (campaign.cursor + campaign.rate_cap.max(1) as usize).min(campaign.recipients.len());
            for index in campaign.cursor..window_end {
                if token.is_cancelled() {
                    return;
                }
                let recipient = &campaign.recipients[index];
                let request = SendRequest {
                    tenant_id: campaign.tenant_id,
                    channel: campaign.channel,
                    from: campaign.from.clone(),
                    to: recipient.clone(),
                    body: (!campaign.body.is_empty()).then(|| campaign.body.clone()),
                    template_id: campaign.template_id,
                    template_params: campaign.template_params.clone(),
                    campaign_id: Some(id),
                    ..SendRequest::default()
                };
                if let Err(error) = self.dispatcher.enqueue_waiting(request).await {
                    // Bad recipient or missing variable: count and move on.
                    warn!(campaign_id = %id, recipient, %error, "campaign dispatch rejected");
                    self.store.record_failed(id);
                }
                self.store.advance_cursor(id, index + 1);
            }

            tokio::select! {
                () = token.cancelled() => return,
                () = self.clock.sleep(Duration::from_secs(1)) => {},
            }
        }
    }
}
