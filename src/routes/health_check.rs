use actix_web::HttpResponse;

/// `GET /health_check`: are we up and answering? Deliberately db-free.
pub async fn health_check() -> HttpResponse { HttpResponse::Ok().finish() }
