use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;

use crate::error::AppError;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ImageRecord {
    pub id: i64,
    pub user_id: i64,
    pub filename: String,
    pub file_path: String,
    pub file_extension: String,
    pub file_hash: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// Everything known about an upload before it gets a row id.
#[derive(Debug, Clone)]
pub struct NewImage {
    pub user_id: i64,
    pub filename: String,
    pub file_path: String,
    pub file_extension: String,
    pub file_hash: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if missing) the database and run pending migrations.
    pub async fn connect(url: &str) -> Result<Self, AppError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        log::info!("Database ready at {}", url);
        Ok(Self { pool })
    }

    pub async fn create_user(&self, email: &str, password_hash: &str) -> Result<User, AppError> {
        let email = email.trim().to_lowercase();
        let user = sqlx::query_as::<_, User>(
            "INSERT INTO users (email, password_hash, created_at) VALUES (?, ?, ?) RETURNING *",
        )
        .bind(&email)
        .bind(password_hash)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if unique_violation(&e) {
                AppError::EmailTaken
            } else {
                AppError::Database(e)
            }
        })?;
        log::info!("User '{}' created (id {})", user.email, user.id);
        Ok(user)
    }

    pub async fn user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let email = email.trim().to_lowercase();
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = ?")
            .bind(&email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    pub async fn user_by_id(&self, id: i64) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    /// Insert the image row and its metadata rows in one transaction.
    pub async fn create_image(
        &self,
        new: NewImage,
        metadata: &[(String, String)],
    ) -> Result<ImageRecord, AppError> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        let image = sqlx::query_as::<_, ImageRecord>(
            "INSERT INTO images \
             (user_id, filename, file_path, file_extension, file_hash, width, height, \
              latitude, longitude, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING *",
        )
        .bind(new.user_id)
        .bind(&new.filename)
        .bind(&new.file_path)
        .bind(&new.file_extension)
        .bind(&new.file_hash)
        .bind(new.width)
        .bind(new.height)
        .bind(new.latitude)
        .bind(new.longitude)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        for (key, value) in metadata {
            sqlx::query(
                "INSERT INTO image_metadata (image_id, key_name, value, created_at) \
                 VALUES (?, ?, ?, ?)",
            )
            .bind(image.id)
            .bind(key)
            .bind(value)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        log::info!(
            "Image '{}' stored for user {} with {} metadata rows",
            image.filename,
            image.user_id,
            metadata.len()
        );
        Ok(image)
    }

    pub async fn image_by_id(&self, id: i64) -> Result<Option<ImageRecord>, AppError> {
        let image = sqlx::query_as::<_, ImageRecord>("SELECT * FROM images WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(image)
    }

    pub async fn images_for_user(&self, user_id: i64) -> Result<Vec<ImageRecord>, AppError> {
        let images = sqlx::query_as::<_, ImageRecord>(
            "SELECT * FROM images WHERE user_id = ? ORDER BY created_at DESC, id DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(images)
    }

    pub async fn metadata_for_image(
        &self,
        image_id: i64,
    ) -> Result<Vec<(String, String)>, AppError> {
        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT key_name, value FROM image_metadata WHERE image_id = ? ORDER BY key_name",
        )
        .bind(image_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn clear_metadata(&self, image_id: i64) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM image_metadata WHERE image_id = ?")
            .bind(image_id)
            .execute(&self.pool)
            .await?;
        log::info!(
            "Cleared {} metadata rows for image {}",
            result.rows_affected(),
            image_id
        );
        Ok(result.rows_affected())
    }

    /// Delete the image row; metadata rows go with it via the cascade.
    pub async fn delete_image(&self, id: i64) -> Result<(), AppError> {
        sqlx::query("DELETE FROM images WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn unique_violation(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(d) => matches!(d.kind(), sqlx::error::ErrorKind::UniqueViolation),
        _ => false,
    }
}
