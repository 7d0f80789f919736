use std::{collections::BTreeSet, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::{
    model::ToolDefinition,
    tools::{parse_args, Tool},
    Result,
};

/// Spreadsheet values access (Google Sheets values API in production).
#[async_trait]
pub trait SheetStore: Send + Sync {
    /// Rows of the A1 `range`; trailing empty cells may be omitted.
    async fn read(&self, range: &str) -> Result<Vec<Vec<String>>>;

    /// Appends one row; returns the A1 range written when the backend reports it.
    async fn append(&self, range: &str, row: Vec<String>) -> Result<Option<String>>;
}

const COLUMNS: usize = 7;

/// One row of the maintenance log (columns B..H).
#[derive(Clone, Debug, PartialEq)]
struct Record {
    date: String,
    device: String,
    description: String,
    cost: String,
    professional: String,
    responsible: String,
    scheduled: String,
}

impl Record {
    fn from_row(row: &[String]) -> Option<Self> {
        if row.len() < COLUMNS {
            return None;
        }
        Some(Self {
            date: row[0].clone(),
            device: row[1].clone(),
            description: row[2].clone(),
            cost: row[3].clone(),
            professional: row[4].clone(),
            responsible: row[5].clone(),
            scheduled: row[6].clone(),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Args {
    action: String,
    date: String,
    device: String,
    details: String,
    worker: String,
    responsible: String,
    price: f64,
    scheduled: bool,
}

#[derive(Serialize)]
struct DeviceDates<'a> {
    nome: &'a str,
    data_manutencao: Vec<&'a str>,
}

/// Reads and appends to the laboratory maintenance spreadsheet.
pub struct MaintenanceSheet {
    store: Arc<dyn SheetStore>,
    sheet_name: String,
}

impl MaintenanceSheet {
    pub fn new(store: Arc<dyn SheetStore>, sheet_name: impl Into<String>) -> Self {
        Self {
            store,
            sheet_name: sheet_name.into(),
        }
    }

    async fn records(&self) -> Result<Vec<Record>> {
        let rows = self
            .store
            .read(&format!("{}!B3:H", self.sheet_name))
            .await?;
        Ok(rows.iter().filter_map(|r| Record::from_row(r)).collect())
    }

    async fn insert(&self, args: &Args) -> Result<String> {
        if args.responsible.trim().is_empty() {
            return Ok(
                "Erro: O responsável é obrigatório para inserir um registro de manutenção."
                    .to_string(),
            );
        }

        let row = vec![
            args.date.clone(),
            args.device.clone(),
            args.details.clone(),
            format_brl(args.price),
            args.worker.clone(),
            args.responsible.clone(),
            if args.scheduled { "Sim" } else { "Não" }.to_string(),
        ];
        debug!(?row, "appending maintenance record");

        let updated = self
            .store
            .append(&format!("{}!B:H", self.sheet_name), row)
            .await?;
        info!(device = %args.device, ?updated, "maintenance record inserted");

        Ok(match updated.as_deref().and_then(first_row_number) {
            Some(line) => format!(
                "Registro de manutenção para '{}' inserido com sucesso na linha {line}.",
                args.device
            ),
            None => format!(
                "Registro de manutenção para '{}' inserido com sucesso.",
                args.device
            ),
        })
    }
}

#[async_trait]
impl Tool for MaintenanceSheet {
    fn name(&self) -> &str {
        "MaintenanceSheet"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "MaintenanceSheet".into(),
            description: "Consulta e registra manutenções de equipamentos na planilha de \
                manutenção do laboratório. Para registrar uma manutenção agendada não é \
                necessário informar preço nem profissional."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "action": {
                        "type": "string",
                        "enum": [
                            "get_last_maintenances",
                            "get_maintenances_by_device",
                            "get_device_maintenances",
                            "insert_maintenance_record"
                        ],
                        "description": "A ação que deve ser realizada."
                    },
                    "date": {"type": "string", "description": "Data da manutenção no formato DD/MM/YYYY."},
                    "device": {"type": "string", "description": "Nome ou identificador do equipamento."},
                    "details": {"type": "string", "description": "Descrição da manutenção."},
                    "worker": {"type": "string", "description": "Profissional que executou a manutenção."},
                    "responsible": {"type": "string", "description": "Responsável pela manutenção. Obrigatório para inserir."},
                    "price": {"type": "number", "description": "Custo da manutenção em reais."},
                    "scheduled": {"type": "boolean", "description": "Se a manutenção está agendada."}
                },
                "required": ["action"]
            }),
        }
    }

    async fn execute(&self, arguments: &str) -> Result<String> {
        let args: Args = parse_args(arguments)?;
        debug!(action = %args.action, "MaintenanceSheet called");

        match args.action.as_str() {
            "insert_maintenance_record" => self.insert(&args).await,
            "get_last_maintenances" | "get_maintenances_by_device" | "get_device_maintenances" => {
                let records = self.records().await?;
                if records.is_empty() {
                    return Ok("Não foram encontrados registros de manutenção.".to_string());
                }
                Ok(match args.action.as_str() {
                    "get_last_maintenances" => last_maintenances(&records),
                    "get_maintenances_by_device" => by_device(&records)?,
                    _ => device_history(&records, &args.device),
                })
            }
            _ => Ok("Ação não reconhecida. Use 'get_last_maintenances', \
                'get_maintenances_by_device', 'get_device_maintenances' ou \
                'insert_maintenance_record'."
                .to_string()),
        }
    }
}

fn last_maintenances(records: &[Record]) -> String {
    let last = &records[records.len().saturating_sub(5)..];
    let mut out = String::from("Os últimos 5 registros de manutenção são:\n");
    for r in last {
        out.push_str(&format!(
            "- {} no dia {} | {} | Responsável: {} | Profissional: {} | {} | Agendada? {}\n",
            r.device, r.date, r.description, r.responsible, r.professional, r.cost, r.scheduled
        ));
    }
    out
}

fn by_device(records: &[Record]) -> Result<String> {
    let mut grouped: Vec<DeviceDates<'_>> = Vec::new();
    for r in records {
        if r.device.is_empty() || r.date.is_empty() {
            continue;
        }
        match grouped.iter_mut().find(|g| g.nome == r.device) {
            Some(g) => g.data_manutencao.push(&r.date),
            None => grouped.push(DeviceDates {
                nome: &r.device,
                data_manutencao: vec![&r.date],
            }),
        }
    }
    if grouped.is_empty() {
        return Ok("Não há registros para agrupar.".to_string());
    }
    Ok(serde_json::to_string_pretty(&grouped)?)
}

fn device_history(records: &[Record], device: &str) -> String {
    let wanted = device.trim().to_lowercase();
    if wanted.is_empty() {
        let devices: BTreeSet<&str> = records
            .iter()
            .map(|r| r.device.as_str())
            .filter(|d| !d.is_empty())
            .collect();
        if devices.is_empty() {
            return "Não foi possível identificar equipamentos únicos para consulta.".to_string();
        }
        return format!(
            "O nome do dispositivo não foi fornecido. Dispositivos disponíveis para consulta:\n- {}",
            devices.into_iter().collect::<Vec<_>>().join("\n- ")
        );
    }

    let matching: Vec<&Record> = records
        .iter()
        .filter(|r| r.device.to_lowercase().contains(&wanted))
        .collect();
    if matching.is_empty() {
        return format!("Nenhum registro encontrado para o equipamento '{device}'.");
    }

    let mut out = format!("Histórico de manutenção para o equipamento '{device}':\n");
    for r in matching {
        out.push_str(&format!(
            "- Data: {} | Descrição: {} | Custo: {} | Profissional: {} | Agendada: {}\n",
            r.date, r.description, r.cost, r.professional, r.scheduled
        ));
    }
    out
}

/// `1234.5` -> `R$ 1.234,50`.
pub fn format_brl(value: f64) -> String {
    let cents = (value.abs() * 100.0).round() as u64;
    let digits = (cents / 100).to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }
    let sign = if value < 0.0 && cents > 0 { "-" } else { "" };
    format!("R$ {sign}{grouped},{:02}", cents % 100)
}

/// `Sheet1!B12:H12` -> `12`.
/// Row of the first cell in an A1 range such as `Sheet1!B42:H42`.
fn first_row_number(a1: &str) -> Option<&str> {
    let (_, cells) = a1.rsplit_once('!')?;
    let first = cells.split(':').next()?;
    let row = first.trim_start_matches(|c: char| c.is_ascii_alphabetic());
    let column_len = first.len() - row.len();
    (column_len > 0 && !row.is_empty() && row.chars().all(|c| c.is_ascii_digit()))
        .then_some(row)
}
