use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use shared::protocol::{DosePlan, NutrientProfile, PlanLine};
use tracing::debug;
use url::Url;

use crate::ComputationService;

const CALCULATE_PATH: &str = "api/calculate_doses";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Serialize)]
struct CalculateRequest<'a> {
    volumen_tanque: f64,
    perfil_seleccionado: &'a str,
}

#[derive(Debug, Deserialize)]
struct CalculateResponse {
    exito: bool,
    #[serde(default)]
    mensaje: String,
    #[serde(default)]
    dosis: Vec<FertilizerDose>,
    ec_estimada: Option<f64>,
    ph_estimado: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct FertilizerDose {
    nombre: String,
    dosis_gramos: f64,
}

/// Client for the chemistry backend that turns a profile and tank volume
/// into per-salt gram amounts.
pub struct HttpComputationService {
    http: Client,
    endpoint: Url,
}

impl HttpComputationService {
    pub fn new(base_url: &str) -> Result<Self> {
        let mut base = Url::parse(base_url)
            .with_context(|| format!("invalid computation service url {base_url}"))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let endpoint = base
            .join(CALCULATE_PATH)
            .context("failed to build dose calculation endpoint")?;
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build http client")?;
        Ok(Self { http, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl ComputationService for HttpComputationService {
    async fn compute_dose_plan(
        &self,
        profile: &NutrientProfile,
        volume_liters: f64,
    ) -> Result<DosePlan> {
        debug!(
            "computation: requesting plan profile={} backend_name={} volume_liters={volume_liters}",
            profile.name,
            profile.backend_name()
        );
        let response: CalculateResponse = self
            .http
            .post(self.endpoint.clone())
            .json(&CalculateRequest {
                volumen_tanque: volume_liters,
                perfil_seleccionado: profile.backend_name(),
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("malformed dose calculation response")?;

        if !response.exito {
            return Err(anyhow!(
                "dose calculation rejected for {}: {}",
                profile.name,
                response.mensaje
            ));
        }

        Ok(DosePlan {
            volume_liters,
            profile_name: profile.name.clone(),
            line_items: response
                .dosis
                .into_iter()
                .map(|dose| PlanLine {
                    salt_name: dose.nombre,
                    grams: dose.dosis_gramos,
                })
                .collect(),
            ec_estimated: response.ec_estimada,
            ph_estimated: response.ph_estimado,
        })
    }
}

#[cfg(test)]
#[path = "tests/computation_tests.rs"]
mod tests;
