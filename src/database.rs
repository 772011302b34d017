use mongodb::{bson, Collection};

use crate::campaign::db::CampaignStore;
use crate::campaign::Campaign;
use crate::error::Error;

pub type MongoCampaignStore = Collection<Campaign>;

pub trait Database: Send + Sync {
    fn campaigns(&self) -> &dyn CampaignStore;
}

#[derive(Debug, Clone)]
pub struct MongoDatabase {
    campaigns: Collection<Campaign>,
}

impl MongoDatabase {
    pub async fn initialize(db: mongodb::Database) -> Result<MongoDatabase, Error> {
        // ping the database to ensure connection is established
        db.run_command(bson::doc! { "ping": 1 }, None).await?;

        Ok(MongoDatabase {
            campaigns: db.collection("campaigns"),
        })
    }
}

impl Database for MongoDatabase {
    fn campaigns(&self) -> &dyn CampaignStore {
        &self.campaigns
    }
}

#[cfg(test)]
pub mod test {
    use async_trait::async_trait;

    use super::*;
    use crate::campaign::CampaignId;

    pub struct MockCampaignStore {
        pub on_insert_campaign: Box<dyn Fn(&Campaign) -> Result<(), Error> + Send + Sync>,
        pub on_fetch_campaigns: Box<dyn Fn() -> Result<Vec<Campaign>, Error> + Send + Sync>,
        pub on_fetch_campaign_by_id:
            Box<dyn Fn(CampaignId) -> Result<Option<Campaign>, Error> + Send + Sync>,
        pub on_replace_campaign: Box<dyn Fn(&Campaign) -> Result<(), Error> + Send + Sync>,
        pub on_delete_campaign: Box<dyn Fn(CampaignId) -> Result<(), Error> + Send + Sync>,
    }

    #[async_trait]
    impl CampaignStore for MockCampaignStore {
        async fn insert_campaign(&self, campaign: &Campaign) -> Result<(), Error> {
            (self.on_insert_campaign)(campaign)
        }

        async fn fetch_campaigns(&self) -> Result<Vec<Campaign>, Error> {
            (self.on_fetch_campaigns)()
        }

        async fn fetch_campaign_by_id(
            &self,
            campaign_id: CampaignId,
        ) -> Result<Option<Campaign>, Error> {
            (self.on_fetch_campaign_by_id)(campaign_id)
        }

        async fn replace_campaign(&self, campaign: Campaign) -> Result<Campaign, Error> {
            (self.on_replace_campaign)(&campaign)?;
            Ok(campaign)
        }

        async fn delete_campaign(&self, campaign_id: CampaignId) -> Result<(), Error> {
            (self.on_delete_campaign)(campaign_id)
        }
    }

    pub struct MockDatabase {
        pub campaigns: MockCampaignStore,
    }

    impl MockDatabase {
        /// Every call panics until the test installs a handler for it.
        pub fn new() -> MockDatabase {
            MockDatabase {
                campaigns: MockCampaignStore {
                    on_insert_campaign: Box::new(|_| panic!("unexpected insert_campaign")),
                    on_fetch_campaigns: Box::new(|| panic!("unexpected fetch_campaigns")),
                    on_fetch_campaign_by_id: Box::new(|_| {
                        panic!("unexpected fetch_campaign_by_id")
                    }),
                    on_replace_campaign: Box::new(|_| panic!("unexpected replace_campaign")),
                    on_delete_campaign: Box::new(|_| panic!("unexpected delete_campaign")),
                },
            }
        }
    }

    impl Database for MockDatabase {
        fn campaigns(&self) -> &dyn CampaignStore {
            &self.campaigns
        }
    }
}
