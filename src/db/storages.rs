use anyhow::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::Database;
use crate::models::{CreateStorageConfig, StorageConfig, UpdateStorageConfig};

fn row_to_storage_config(row: &SqliteRow) -> Result<StorageConfig> {
    let id: i64 = row.get("id");
    let raw_config: String = row.get("config");
    let config = serde_json::from_str(&raw_config)
        .map_err(|e| anyhow::anyhow!("Storage {} has an unreadable config column: {}", id, e))?;

    Ok(StorageConfig {
        id,
        name: row.get("name"),
        storage_type: row.get("type"),
        config,
        priority: row.get("priority"),
        description: row.get("description"),
    })
}

impl Database {
    pub async fn get_storage_configs(&self) -> Result<Vec<StorageConfig>> {
        let rows = sqlx::query(
            r#"SELECT id, name, type, config, priority, description
               FROM storages ORDER BY priority DESC, id ASC"#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!("Database query failed: {}", e))?;

        rows.iter().map(row_to_storage_config).collect()
    }

    pub async fn get_storage_config(&self, id: i64) -> Result<Option<StorageConfig>> {
        let row = sqlx::query(
            r#"SELECT id, name, type, config, priority, description
               FROM storages WHERE id = ?"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!("Database query failed: {}", e))?;

        row.as_ref().map(row_to_storage_config).transpose()
    }

    pub async fn create_storage_config(&self, storage: &CreateStorageConfig) -> Result<StorageConfig> {
        let result = sqlx::query(
            r#"INSERT INTO storages (name, type, config, priority, description)
               VALUES (?, ?, ?, ?, ?)"#,
        )
        .bind(&storage.name)
        .bind(&storage.storage_type)
        .bind(storage.config.to_string())
        .bind(storage.priority)
        .bind(&storage.description)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!("Database insert failed: {}", e))?;

        let id = result.last_insert_rowid();
        self.get_storage_config(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Storage {} vanished after insert", id))
    }

    pub async fn update_storage_config(&self, id: i64, update: &UpdateStorageConfig) -> Result<Option<StorageConfig>> {
        let Some(existing) = self.get_storage_config(id).await? else {
            return Ok(None);
        };

        let config = update.config.as_ref().unwrap_or(&existing.config).to_string();

        sqlx::query(
            r#"UPDATE storages SET name = ?, type = ?, config = ?, priority = ?, description = ?
               WHERE id = ?"#,
        )
        .bind(update.name.as_ref().unwrap_or(&existing.name))
        .bind(update.storage_type.as_ref().unwrap_or(&existing.storage_type))
        .bind(config)
        .bind(update.priority.unwrap_or(existing.priority))
        .bind(update.description.as_ref().or(existing.description.as_ref()))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!("Database update failed: {}", e))?;

        self.get_storage_config(id).await
    }

    pub async fn delete_storage_config(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM storages WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| anyhow::anyhow!("Database delete failed: {}", e))?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn new_storage(name: &str, priority: i64) -> CreateStorageConfig {
        CreateStorageConfig {
            name: name.to_string(),
            storage_type: "local".to_string(),
            config: json!({"path": format!("/srv/{}", name)}),
            priority,
            description: None,
        }
    }

    #[tokio::test]
    async fn test_storage_config_crud() {
        let db = Database::in_memory().await.unwrap();

        let low = db.create_storage_config(&new_storage("low", 1)).await.unwrap();
        let high = db.create_storage_config(&new_storage("high", 10)).await.unwrap();
        assert_eq!(high.config, json!({"path": "/srv/high"}));

        let all = db.get_storage_configs().await.unwrap();
        assert_eq!(all.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(), vec!["high", "low"]);

        let updated = db
            .update_storage_config(
                low.id,
                &UpdateStorageConfig {
                    name: None,
                    storage_type: None,
                    config: None,
                    priority: Some(20),
                    description: Some("promoted".to_string()),
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.priority, 20);
        assert_eq!(updated.name, "low");
        assert_eq!(updated.description.as_deref(), Some("promoted"));

        assert!(db.delete_storage_config(high.id).await.unwrap());
        assert!(!db.delete_storage_config(high.id).await.unwrap());
        assert_eq!(db.get_storage_configs().await.unwrap().len(), 1);
    }
}
