//! MongoDB user repository.
//!
//! Users live in the `users` collection keyed by `ObjectId`. Password changes
//! run in a session transaction at majority read/write concern against the
//! primary so the compare-and-set is atomic across replicas. The driver's
//! `with_transaction` reruns a transaction that loses a write conflict.

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use mongodb::bson::{doc, oid::ObjectId};
use mongodb::options::{
    Acknowledgment, ReadConcern, ReadPreference, SelectionCriteria, TransactionOptions,
    WriteConcern,
};
use mongodb::{Client, ClientSession, Collection};

use crate::config::{Backend, MongoConfig};
use crate::error::AppError;
use crate::models::{NewUser, PasswordUpdate, PasswordUpdated, User, UserId};
use crate::repositories::codec::{self, parse_object_id, Precision, UserDocument};
use crate::repositories::UserRepository;

const COLLECTION: &str = "users";
const PRECISION: Precision = Precision::Millis;

/// Users stored as BSON documents.
#[derive(Clone)]
pub struct MongoUserRepository {
    client: Client,
    users: Collection<UserDocument>,
}

impl MongoUserRepository {
    pub fn new(client: Client, database: &str) -> Self {
        let users = client.database(database).collection(COLLECTION);
        Self { client, users }
    }

    /// Parses the connection string and builds the client. The driver
    /// connects lazily on first operation.
    pub async fn connect(config: &MongoConfig) -> Result<Self, AppError> {
        tracing::info!(
            address = %config.address,
            database = %config.database,
            "Using MongoDB backend"
        );
        let client = Client::with_uri_str(config.uri()).await?;
        Ok(Self::new(client, &config.database))
    }

    async fn find(&self, id: ObjectId) -> Result<Option<User>, AppError> {
        self.users
            .find_one(doc! { "_id": id }, None)
            .await?
            .map(User::try_from)
            .transpose()
    }
}

fn transaction_options() -> TransactionOptions {
    TransactionOptions::builder()
        .read_concern(ReadConcern::majority())
        .write_concern(WriteConcern::builder().w(Acknowledgment::Majority).build())
        .selection_criteria(SelectionCriteria::ReadPreference(ReadPreference::Primary))
        .build()
}

/// Everything a password-change transaction needs, owned so the driver can
/// rerun it.
struct PasswordChange {
    users: Collection<UserDocument>,
    id: ObjectId,
    update: PasswordUpdate,
}

/// One attempt of a password change inside `with_transaction`.
///
/// Driver errors are handed back to the driver, which reruns the transaction
/// when the server labels them `TransientTransactionError`. Domain failures
/// abort the transaction and end the run.
async fn attempt_password_change(
    session: &mut ClientSession,
    change: &mut PasswordChange,
) -> mongodb::error::Result<Result<(), AppError>> {
    match change_password(&change.users, session, change.id, &change.update).await {
        Ok(()) => Ok(Ok(())),
        Err(AppError::Mongo(err)) => Err(err),
        Err(err) => {
            session.abort_transaction().await?;
            Ok(Err(err))
        }
    }
}

async fn change_password(
    users: &Collection<UserDocument>,
    session: &mut ClientSession,
    id: ObjectId,
    update: &PasswordUpdate,
) -> Result<(), AppError> {
    let current = users
        .find_one_with_session(doc! { "_id": id }, None, session)
        .await?
        .ok_or_else(|| AppError::UserNotFound(id.to_hex()))?;

    if current.password != update.password {
        return Err(AppError::PasswordMismatch(id.to_hex()));
    }

    let previous = codec::from_bson_datetime(current.updated_at)?;
    let updated_at = codec::next_updated_at(previous, Utc::now(), PRECISION);

    let result = users
        .update_one_with_session(
            doc! { "_id": id, "password": update.password.as_str() },
            doc! {
                "$set": {
                    "password": update.new_password.as_str(),
                    "updatedAt": codec::to_bson_datetime(updated_at),
                }
            },
            None,
            session,
        )
        .await?;

    if result.matched_count == 0 {
        return Err(AppError::PasswordMismatch(id.to_hex()));
    }
    Ok(())
}

#[async_trait]
impl UserRepository for MongoUserRepository {
    fn backend(&self) -> Backend {
        Backend::Mongodb
    }

    async fn create(&self, input: NewUser) -> Result<User, AppError> {
        let document = UserDocument::new(input, PRECISION.now());
        let inserted = self.users.insert_one(&document, None).await?;

        let id = inserted.inserted_id.as_object_id().ok_or_else(|| {
            AppError::Decode(format!("inserted _id is not an ObjectId: {}", inserted.inserted_id))
        })?;

        let user = self
            .find(id)
            .await?
            .ok_or_else(|| AppError::UserNotFound(id.to_hex()))?;

        tracing::debug!(id = %user.id, "Created user");
        Ok(user)
    }

    async fn get_by_id(&self, id: &str) -> Result<User, AppError> {
        let oid = parse_object_id(id)?;
        self.find(oid)
            .await?
            .ok_or_else(|| AppError::UserNotFound(id.to_string()))
    }

    async fn update_password(
        &self,
        id: &str,
        update: PasswordUpdate,
    ) -> Result<PasswordUpdated, AppError> {
        let oid = parse_object_id(id)?;

        let mut session = self.client.start_session(None).await?;
        let change = PasswordChange {
            users: self.users.clone(),
            id: oid,
            update,
        };
        session
            .with_transaction(
                change,
                |session, change| attempt_password_change(session, change).boxed(),
                transaction_options(),
            )
            .await??;

        tracing::debug!(id = %oid, "Updated password");
        Ok(PasswordUpdated {
            id: UserId::Object(oid.to_hex()),
        })
    }
}
