use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use tera::{Context, Tera};
use tracing::info;

use super::{Gateway, OutgoingMessage, SendRecord};
use crate::error::DispatchError;

/// Renders `<template_dir>/<action>.txt` with the message context and hands
/// the result to the log transport.
pub struct TemplateMailer {
    tera: Tera,
}

impl TemplateMailer {
    pub fn new(template_dir: &Path) -> Result<Self, tera::Error> {
        let mut tera = Tera::default();
        if template_dir.exists() {
            let files = std::fs::read_dir(template_dir)
                .map_err(|e| tera::Error::msg(format!("reading {}: {e}", template_dir.display())))?
                .filter_map(Result::ok)
                .map(|e| e.path())
                .filter(|p| p.extension().is_some_and(|ext| ext == "txt"))
                .filter_map(|p| {
                    let name = p.file_name()?.to_str()?.to_string();
                    Some((p, Some(name)))
                });
            tera.add_template_files(files)?;
        }
        Ok(Self { tera })
    }

    pub fn render(&self, message: &OutgoingMessage) -> Result<String, DispatchError> {
        let name = format!("{}.txt", message.action.as_str());
        if !self.tera.get_template_names().any(|t| t == name) {
            return Ok(format!(
                "[{}] submission {:?} assignment {:?}",
                message.action, message.submission_id, message.assignment_id
            ));
        }
        let context = Context::from_serialize(&message.context)
            .map_err(|e| DispatchError::Gateway(e.to_string()))?;
        self.tera
            .render(&name, &context)
            .map_err(|e| DispatchError::Gateway(e.to_string()))
    }
}

#[async_trait]
impl Gateway for TemplateMailer {
    async fn send(&self, message: &OutgoingMessage) -> Result<SendRecord, DispatchError> {
        let body = self.render(message)?;
        info!(
            action = %message.action,
            to = ?message.to,
            cc = ?message.cc,
            "sending notification\n{}",
            body
        );
        Ok(SendRecord {
            action: message.action.as_str().to_string(),
            submission_id: message.submission_id,
            assignment_id: message.assignment_id,
            created_at: Utc::now(),
        })
    }
}
