//! Visitor-facing messages (Arabic).

pub const SUBMITTED_TOO_FAST: &str = "يرجى التمهل قليلاً قبل إرسال النموذج";
pub const INVALID_EMAIL: &str = "يرجى إدخال بريد إلكتروني صحيح";
pub const INVALID_PHONE: &str = "يرجى إدخال رقم هاتف عراقي صحيح (مثال: 07701234567)";
pub const INVALID_NAME: &str = "يرجى إدخال اسم صحيح (من 2 إلى 100 حرف)";
pub const REQUIRED_FIELDS: &str = "يرجى ملء جميع الحقول المطلوبة";
pub const SENDING: &str = "جاري الإرسال...";
pub const SUBMIT_SUCCESS: &str = "تم إرسال رسالتك بنجاح! سنتواصل معك قريباً";
pub const SUBMIT_FAILURE: &str = "حدث خطأ أثناء الإرسال. يرجى المحاولة مرة أخرى";
pub const REQUEST_LOCKED_OUT: &str = "تم إيقاف الطلبات مؤقتاً بسبب أخطاء متكررة. يرجى المحاولة لاحقاً";
pub const SERVER_RATE_LIMITED: &str = "طلبات كثيرة جداً. يرجى الانتظار قبل المحاولة مرة أخرى";

/// Message for a blocked fingerprint, in whole minutes rounded up.
pub fn rate_limit_blocked(remaining_seconds: u64) -> String {
    let minutes = remaining_seconds.div_ceil(60).max(1);
    format!(
        "لقد تجاوزت الحد المسموح من المحاولات. يرجى المحاولة بعد {} دقيقة",
        minutes
    )
}
