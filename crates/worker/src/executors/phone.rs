//! 号码生成与校验执行器

use std::collections::HashSet;

use async_trait::async_trait;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use campaign_core::{models::categories, CampaignError, CampaignResult};

use crate::context::JobContext;
use crate::executor::JobExecutor;

/// 单个任务最多处理的号码数量
pub const MAX_QUANTITY: u64 = 1_000_000;
/// E.164 号码（不含 `+`）最长 15 位
const E164_MAX_DIGITS: usize = 15;
const E164_MIN_DIGITS: usize = 8;
const BATCH_SIZE: u64 = 1_000;
/// 结果中最多内联的号码数量，超出时只保留样本
const INLINE_RESULT_LIMIT: usize = 10_000;
const SAMPLE_SIZE: usize = 100;

fn default_country_code() -> String {
    "1".to_string()
}

fn default_national_length() -> usize {
    10
}

fn default_unique() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhoneGenerationParams {
    pub quantity: u64,
    #[serde(default = "default_country_code")]
    pub country_code: String,
    /// 号段前缀，为空时随机生成（首位非 0）
    #[serde(default)]
    pub area_codes: Vec<String>,
    #[serde(default = "default_national_length")]
    pub national_length: usize,
    #[serde(default = "default_unique")]
    pub unique: bool,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl PhoneGenerationParams {
    pub fn parse(payload: &Value) -> CampaignResult<Self> {
        let params: Self = serde_json::from_value(payload.clone())
            .map_err(|e| CampaignError::validation(format!("号码生成参数无效: {e}")))?;
        params.validate()?;
        Ok(params)
    }

    fn validate(&self) -> CampaignResult<()> {
        if self.quantity == 0 {
            return Err(CampaignError::validation("生成数量必须大于0"));
        }
        if self.quantity > MAX_QUANTITY {
            return Err(CampaignError::validation(format!(
                "生成数量不能超过 {MAX_QUANTITY}"
            )));
        }
        if !is_digits(&self.country_code)
            || self.country_code.len() > 3
            || self.country_code.starts_with('0')
        {
            return Err(CampaignError::validation(format!(
                "国家代码无效: {}",
                self.country_code
            )));
        }
        if self.national_length < 4
            || self.country_code.len() + self.national_length > E164_MAX_DIGITS
        {
            return Err(CampaignError::validation(format!(
                "号码长度无效: {} (国家代码 + 号码不超过 {} 位)",
                self.national_length, E164_MAX_DIGITS
            )));
        }
        for area in &self.area_codes {
            if !is_digits(area) || area.len() >= self.national_length {
                return Err(CampaignError::validation(format!("号段无效: {area}")));
            }
        }
        if self.unique && (self.quantity as u128) > self.capacity() {
            return Err(CampaignError::validation(format!(
                "号码空间不足以生成 {} 个不重复号码",
                self.quantity
            )));
        }
        Ok(())
    }

    /// 可生成的不同号码总数
    fn capacity(&self) -> u128 {
        let space = |free_digits: usize| 10u128.saturating_pow(free_digits as u32);
        if self.area_codes.is_empty() {
            9 * space(self.national_length - 1)
        } else {
            let distinct: HashSet<&String> = self.area_codes.iter().collect();
            distinct
                .into_iter()
                .map(|area| space(self.national_length - area.len()))
                .fold(0u128, |acc, n| acc.saturating_add(n))
        }
    }

    fn generate_one(&self, rng: &mut StdRng) -> String {
        let mut number = String::with_capacity(1 + self.country_code.len() + self.national_length);
        number.push('+');
        number.push_str(&self.country_code);

        let free_digits = if self.area_codes.is_empty() {
            number.push(char::from(b'1' + rng.random_range(0..9u8)));
            self.national_length - 1
        } else {
            let area = &self.area_codes[rng.random_range(0..self.area_codes.len())];
            number.push_str(area);
            self.national_length - area.len()
        };
        for _ in 0..free_digits {
            number.push(char::from(b'0' + rng.random_range(0..10u8)));
        }
        number
    }
}

/// 批量生成 E.164 号码
#[derive(Default)]
pub struct PhoneGenerationExecutor;

impl PhoneGenerationExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl JobExecutor for PhoneGenerationExecutor {
    fn category(&self) -> &str {
        categories::PHONE_GENERATION
    }

    fn validate(&self, payload: &Value) -> CampaignResult<()> {
        PhoneGenerationParams::parse(payload).map(|_| ())
    }

    async fn execute(&self, ctx: &JobContext) -> CampaignResult<Value> {
        let params = PhoneGenerationParams::parse(ctx.payload())?;
        let mut rng = match params.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let total = params.quantity;
        let mut seen: HashSet<String> = HashSet::new();
        let mut numbers: Vec<String> = Vec::new();
        let mut generated = 0u64;

        while generated < total {
            ctx.checkpoint()?;
            let batch_end = (generated + BATCH_SIZE).min(total);
            while generated < batch_end {
                let number = params.generate_one(&mut rng);
                if params.unique && !seen.insert(number.clone()) {
                    continue;
                }
                if numbers.len() < INLINE_RESULT_LIMIT {
                    numbers.push(number);
                }
                generated += 1;
            }
            ctx.report_counts(generated, total, "生成号码").await?;
            tokio::task::yield_now().await;
        }

        info!("任务 {} 生成了 {} 个号码", ctx.job_id(), generated);
        let inline = generated as usize <= INLINE_RESULT_LIMIT;
        if !inline {
            numbers.truncate(SAMPLE_SIZE);
        }
        Ok(json!({
            "generated": generated,
            "country_code": params.country_code,
            "unique": params.unique,
            "truncated": !inline,
            "numbers": numbers,
        }))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhoneValidationParams {
    pub numbers: Vec<String>,
    /// 没有国际前缀的号码使用的国家代码
    #[serde(default)]
    pub default_country_code: Option<String>,
}

impl PhoneValidationParams {
    pub fn parse(payload: &Value) -> CampaignResult<Self> {
        let params: Self = serde_json::from_value(payload.clone())
            .map_err(|e| CampaignError::validation(format!("号码校验参数无效: {e}")))?;
        if params.numbers.is_empty() {
            return Err(CampaignError::validation("待校验号码数量必须大于0"));
        }
        if params.numbers.len() as u64 > MAX_QUANTITY {
            return Err(CampaignError::validation(format!(
                "待校验号码不能超过 {MAX_QUANTITY} 个"
            )));
        }
        if let Some(code) = &params.default_country_code {
            if !is_digits(code) || code.len() > 3 || code.starts_with('0') {
                return Err(CampaignError::validation(format!("国家代码无效: {code}")));
            }
        }
        Ok(params)
    }
}

/// 把输入规范化为 E.164，失败时返回原因
pub fn normalize_e164(input: &str, default_country_code: Option<&str>) -> Result<String, &'static str> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err("号码为空");
    }

    let mut digits = String::with_capacity(trimmed.len());
    let mut international = false;
    for (i, c) in trimmed.chars().enumerate() {
        match c {
            '+' if i == 0 => international = true,
            '0'..='9' => digits.push(c),
            ' ' | '-' | '(' | ')' | '.' => {}
            _ => return Err("包含非法字符"),
        }
    }

    if !international {
        if let Some(rest) = digits.strip_prefix("00") {
            digits = rest.to_string();
        } else {
            match default_country_code {
                Some(code) => digits = format!("{code}{}", digits.trim_start_matches('0')),
                None => return Err("缺少国家代码"),
            }
        }
    }

    if digits.starts_with('0') {
        return Err("国家代码不能以0开头");
    }
    if digits.len() < E164_MIN_DIGITS {
        return Err("号码过短");
    }
    if digits.len() > E164_MAX_DIGITS {
        return Err("号码过长");
    }
    Ok(format!("+{digits}"))
}

/// 批量校验并规范化号码
#[derive(Default)]
pub struct PhoneValidationExecutor;

impl PhoneValidationExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl JobExecutor for PhoneValidationExecutor {
    fn category(&self) -> &str {
        categories::PHONE_VALIDATION
    }

    fn validate(&self, payload: &Value) -> CampaignResult<()> {
        PhoneValidationParams::parse(payload).map(|_| ())
    }

    async fn execute(&self, ctx: &JobContext) -> CampaignResult<Value> {
        let params = PhoneValidationParams::parse(ctx.payload())?;
        let total = params.numbers.len() as u64;
        let mut valid_numbers = Vec::new();
        let mut invalid = Vec::new();
        let mut invalid_count = 0u64;

        for (chunk_index, chunk) in params.numbers.chunks(BATCH_SIZE as usize).enumerate() {
            ctx.checkpoint()?;
            for input in chunk {
                match normalize_e164(input, params.default_country_code.as_deref()) {
                    Ok(number) => {
                        if valid_numbers.len() < INLINE_RESULT_LIMIT {
                            valid_numbers.push(number);
                        }
                    }
                    Err(reason) => {
                        invalid_count += 1;
                        if invalid.len() < INLINE_RESULT_LIMIT {
                            invalid.push(json!({"input": input, "reason": reason}));
                        }
                    }
                }
            }
            let processed = ((chunk_index as u64 + 1) * BATCH_SIZE).min(total);
            ctx.report_counts(processed, total, "校验号码").await?;
            tokio::task::yield_now().await;
        }

        Ok(json!({
            "total": total,
            "valid": total - invalid_count,
            "invalid": invalid_count,
            "valid_numbers": valid_numbers,
            "invalid_numbers": invalid,
        }))
    }
}

fn is_digits(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_quantity_is_rejected() {
        let err = PhoneGenerationExecutor::new()
            .validate(&json!({"quantity": 0}))
            .unwrap_err();
        assert!(matches!(err, CampaignError::Validation(_)));
    }

    #[test]
    fn test_generation_params_validation() {
        let executor = PhoneGenerationExecutor::new();
        assert!(executor.validate(&json!({"quantity": 5})).is_ok());
        assert!(executor
            .validate(&json!({"quantity": 5, "country_code": "044"}))
            .is_err());
        assert!(executor
            .validate(&json!({"quantity": 5, "country_code": "86", "national_length": 14}))
            .is_err());
        assert!(executor
            .validate(&json!({"quantity": 5, "area_codes": ["41a"]}))
            .is_err());
        // 两位空闲号位最多 100 个不重复号码
        assert!(executor
            .validate(&json!({"quantity": 101, "area_codes": ["41"], "national_length": 4}))
            .is_err());
        assert!(executor.validate(&json!({"count": 5})).is_err());
    }

    #[test]
    fn test_generated_numbers_are_valid_e164() {
        let params = PhoneGenerationParams::parse(&json!({
            "quantity": 50,
            "country_code": "44",
            "area_codes": ["7700"],
            "seed": 1
        }))
        .unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..50 {
            let number = params.generate_one(&mut rng);
            assert!(number.starts_with("+447700"));
            assert_eq!(number.len(), 1 + 2 + 10);
            assert_eq!(normalize_e164(&number, None).unwrap(), number);
        }
    }

    #[test]
    fn test_normalization() {
        assert_eq!(
            normalize_e164("+1 (415) 555-0100", None).unwrap(),
            "+14155550100"
        );
        assert_eq!(normalize_e164("0044 20 7946 0958", None).unwrap(), "+442079460958");
        assert_eq!(normalize_e164("020 7946 0958", Some("44")).unwrap(), "+442079460958");
        assert_eq!(normalize_e164("4155550100", None), Err("缺少国家代码"));
        assert_eq!(normalize_e164("+1415abc", None), Err("包含非法字符"));
        assert_eq!(normalize_e164("+12345", None), Err("号码过短"));
        assert_eq!(normalize_e164("+1234567890123456", None), Err("号码过长"));
    }

    #[test]
    fn test_empty_validation_batch_is_rejected() {
        assert!(PhoneValidationExecutor::new()
            .validate(&json!({"numbers": []}))
            .is_err());
    }
}
