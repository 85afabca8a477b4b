//! MongoDB change stream feed source.

use bson::{doc, Document};
use futures::{FutureExt, StreamExt};
use mongodb::options::FullDocumentType;
use mongodb::Client;
use tracing::{debug, info};

use super::{ChangeFeed, FeedRequest, FeedSource};
use crate::error::Error;

/// Opens change streams on a MongoDB deployment.
///
/// The driver client is pooled internally, so every feed shares one client.
#[derive(Clone)]
pub struct MongoFeedSource {
    client: Client,
}

impl MongoFeedSource {
    /// Connect to the deployment at `uri` and verify it answers a ping on
    /// `database`.
    pub async fn connect(uri: &str, database: &str) -> Result<Self, Error> {
        let client = Client::with_uri_str(uri)
            .await
            .map_err(|e| Error::Feed(format!("connect error: {}", e)))?;

        client
            .database(database)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| Error::Feed(format!("ping error: {}", e)))?;

        info!(database = %database, "upstream connected");
        Ok(Self { client })
    }
}

impl FeedSource for MongoFeedSource {
    fn open(
        &self,
        request: FeedRequest,
    ) -> futures::future::BoxFuture<'static, Result<ChangeFeed, Error>> {
        let client = self.client.clone();

        async move {
            debug!(
                db = %request.db,
                collection = %request.collection,
                stages = request.pipeline.len(),
                "opening change stream"
            );

            let collection = client
                .database(&request.db)
                .collection::<Document>(&request.collection);

            let mut watch = collection
                .watch()
                .pipeline(request.pipeline)
                .batch_size(request.options.batch_size);
            if request.options.full_document_lookup {
                watch = watch.full_document(FullDocumentType::UpdateLookup);
            }

            let stream = watch
                .await
                .map_err(|e| Error::Feed(format!("watch error: {}", e)))?
                .with_type::<Document>();

            let feed: ChangeFeed = stream
                .map(|change| change.map_err(|e| Error::Feed(e.to_string())))
                .boxed();
            Ok(feed)
        }
        .boxed()
    }
}
