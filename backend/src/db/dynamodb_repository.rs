use std::collections::HashMap;
use std::str::FromStr;

use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::types::AttributeValue;
use chrono::{DateTime, Utc};
use shared::{DiagnosisRecord, DiseaseClass, SeverityLevel};
use uuid::Uuid;

/// Diagnosis records in one DynamoDB table keyed by `(user_id, id)`:
/// `user_id` partition key, `id` sort key. Append-only; the only delete path
/// is the whole-account purge.
#[derive(Clone)]
pub struct DynamoDbRepository {
    client: Client,
    detections_table: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("DynamoDB error: {0}")]
    DynamoDb(String),
    #[error("Invalid data format: {0}")]
    InvalidData(String),
}

impl DynamoDbRepository {
    pub fn new(client: Client, detections_table: String) -> Self {
        Self {
            client,
            detections_table,
        }
    }

    pub async fn put_record(&self, record: &DiagnosisRecord) -> Result<(), RepositoryError> {
        let mut item = HashMap::new();
        item.insert(
            "user_id".to_string(),
            AttributeValue::S(record.user_id.to_string()),
        );
        item.insert("id".to_string(), AttributeValue::S(record.id.to_string()));
        item.insert(
            "timestamp".to_string(),
            AttributeValue::S(record.timestamp.to_rfc3339()),
        );
        item.insert(
            "disease_detected".to_string(),
            AttributeValue::Bool(record.disease_detected),
        );
        if let Some(disease) = &record.disease_type {
            item.insert(
                "disease_type".to_string(),
                AttributeValue::S(disease.to_string()),
            );
        }
        item.insert(
            "confidence".to_string(),
            AttributeValue::N(record.confidence.to_string()),
        );
        item.insert(
            "severity_level".to_string(),
            AttributeValue::S(record.severity_level.to_string()),
        );
        item.insert(
            "severity_percentage".to_string(),
            AttributeValue::N(record.severity_percentage.to_string()),
        );
        if let Some(treatment) = &record.treatment_recommendation {
            item.insert(
                "treatment_recommendation".to_string(),
                AttributeValue::S(treatment.clone()),
            );
        }

        match self
            .client
            .put_item()
            .table_name(&self.detections_table)
            .set_item(Some(item))
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => {
                log::error!("DynamoDB put_item failed for record {}: {:?}", record.id, e);
                Err(RepositoryError::DynamoDb(e.to_string()))
            }
        }
    }

    /// All records in the user's partition, following `last_evaluated_key`
    /// across the 1 MB query pages so a long history is never truncated.
    /// Sorting happens in the store layer; DynamoDB returns the partition in
    /// sort-key order, which is not the timestamp order history wants.
    pub async fn get_user_records(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<DiagnosisRecord>, RepositoryError> {
        let mut records = Vec::new();
        let mut start_key: Option<HashMap<String, AttributeValue>> = None;

        loop {
            let result = self
                .client
                .query()
                .table_name(&self.detections_table)
                .key_condition_expression("user_id = :user_id")
                .expression_attribute_values(":user_id", AttributeValue::S(user_id.to_string()))
                .set_exclusive_start_key(start_key.take())
                .send()
                .await
                .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;

            if let Some(items) = result.items {
                for item in items {
                    records.push(self.parse_record_from_item(item)?);
                }
            }
            match result.last_evaluated_key {
                Some(key) if !key.is_empty() => start_key = Some(key),
                _ => break,
            }
        }
        Ok(records)
    }

    /// Bulk account deletion hook: removes every record for the user and
    /// returns how many were deleted.
    pub async fn delete_user_records(&self, user_id: Uuid) -> Result<u64, RepositoryError> {
        let records = self.get_user_records(user_id).await?;
        let mut deleted = 0u64;
        for record in &records {
            let mut key = HashMap::new();
            key.insert(
                "user_id".to_string(),
                AttributeValue::S(user_id.to_string()),
            );
            key.insert("id".to_string(), AttributeValue::S(record.id.to_string()));

            self.client
                .delete_item()
                .table_name(&self.detections_table)
                .set_key(Some(key))
                .send()
                .await
                .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;
            deleted += 1;
        }
        Ok(deleted)
    }

    fn parse_record_from_item(
        &self,
        item: HashMap<String, AttributeValue>,
    ) -> Result<DiagnosisRecord, RepositoryError> {
        let id = item
            .get("id")
            .and_then(|v| v.as_s().ok())
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| RepositoryError::InvalidData("Invalid id".to_string()))?;

        let user_id = item
            .get("user_id")
            .and_then(|v| v.as_s().ok())
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| RepositoryError::InvalidData("Invalid user_id".to_string()))?;

        let timestamp = item
            .get("timestamp")
            .and_then(|v| v.as_s().ok())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| RepositoryError::InvalidData("Invalid timestamp".to_string()))?;

        let disease_detected = item
            .get("disease_detected")
            .and_then(|v| v.as_bool().ok())
            .copied()
            .ok_or_else(|| RepositoryError::InvalidData("Invalid disease_detected".to_string()))?;

        let disease_type = match item.get("disease_type").and_then(|v| v.as_s().ok()) {
            Some(s) => Some(
                DiseaseClass::from_str(s)
                    .map_err(|_| RepositoryError::InvalidData("Invalid disease_type".to_string()))?,
            ),
            None => None,
        };

        let confidence = item
            .get("confidence")
            .and_then(|v| v.as_n().ok())
            .and_then(|s| s.parse::<f32>().ok())
            .ok_or_else(|| RepositoryError::InvalidData("Invalid confidence".to_string()))?;

        let severity_level = item
            .get("severity_level")
            .and_then(|v| v.as_s().ok())
            .and_then(|s| SeverityLevel::from_str(s).ok())
            .ok_or_else(|| RepositoryError::InvalidData("Invalid severity_level".to_string()))?;

        let severity_percentage = item
            .get("severity_percentage")
            .and_then(|v| v.as_n().ok())
            .and_then(|s| s.parse::<f32>().ok())
            .ok_or_else(|| {
                RepositoryError::InvalidData("Invalid severity_percentage".to_string())
            })?;

        let treatment_recommendation = item
            .get("treatment_recommendation")
            .and_then(|v| v.as_s().ok())
            .cloned();

        Ok(DiagnosisRecord {
            id,
            user_id,
            timestamp,
            disease_detected,
            disease_type,
            confidence,
            severity_level,
            severity_percentage,
            treatment_recommendation,
        })
    }
}
